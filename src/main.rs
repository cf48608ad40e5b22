#[cfg(unix)]
fn main() {
    use devhub::cli::Cli;
    use tracing_subscriber::EnvFilter;

    // Logs go to stderr so table output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devhub=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if Cli::run().is_err() {
        std::process::exit(1);
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("✗ Error: the devhub CLI talks over Unix domain sockets and needs a unix platform");
    std::process::exit(1);
}
