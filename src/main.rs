use podtraffic::settings::Settings;
use podtraffic::{logging, Exit};

#[tokio::main]
async fn main() {
    logging::init();

    let settings = Settings::from_env();
    match podtraffic::run(settings).await {
        Ok(Exit::LifetimeExpired) => {
            log::info!("Exit 0.");
            std::process::exit(0);
        }
        Ok(exit) => log::info!("stopped: {exit:?}"),
        Err(err) => {
            log::error!("{err}");
            std::process::exit(1);
        }
    }
}
