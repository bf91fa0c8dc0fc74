//! `vmlite-init`, the kernel's user-space entry point inside the guest.

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("vmlite-init only runs inside a Linux guest");
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use vmlite_guest::{logging, supervisor};

    // Log level first: an unknown value must fail before anything else runs.
    let level = logging::level_from_env()?;
    logging::init(level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "vmlite guest bootstrap starting"
    );

    supervisor::run().await?;
    Ok(())
}
