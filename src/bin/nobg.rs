//! `nobg`: on-device background removal from the command line

#[cfg(feature = "cli")]
use nobg::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("nobg was built without the \"cli\" feature; rebuild with --features cli");
    std::process::exit(1);
}
