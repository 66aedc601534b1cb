use drain_server::cli::Args;
use drain_server::counter::ConnectionCounter;
use drain_server::error::ServerResult;
use drain_server::server::ServerBuilder;
use drain_server::shutdown::{self, ShutdownCoordinator};

#[tokio::main]
pub async fn main() -> ServerResult<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().filter_or("DRAIN_LOG", "info"));
    let args = Args::parse();

    let counter = ConnectionCounter::new();
    let server = ServerBuilder::new()
        .bind(args.bind())
        .counter(counter.clone())
        .listen()
        .await?;
    log::info!(target: "drain", "Server is running on: {}", server.local_addr()?);

    let signal = shutdown::termination()?;
    let coordinator = ShutdownCoordinator::new(server.handle(), counter, args.shutdown_policy());

    let serving = tokio::spawn(server.serve());
    let coordinating = tokio::spawn(coordinator.run_or_exit(signal));

    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log::error!(target: "drain", "Listen error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            log::error!(target: "drain", "Server task failed: {}", e);
            std::process::exit(1);
        }
    }
    if let Err(e) = coordinating.await {
        log::error!(target: "drain", "Shutdown coordinator failed: {}", e);
        std::process::exit(1);
    }

    log::info!(target: "drain", "Server exiting");
    Ok(())
}
