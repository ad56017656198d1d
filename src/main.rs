use std::{env, process};

use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use tokio::signal;
use tracing::{error, info};

use sql_greylist_policy::server;
use sql_greylist_policy::settings::Settings;
use sql_greylist_policy::store::{RetryPolicy, RetryingStore, SeaOrmStore};

fn usage() -> ! {
    eprintln!(
        "usage: {} [--version | --conf <filename> | setup]",
        env!("CARGO_PKG_NAME")
    );
    process::exit(1);
}

#[tokio::main]
async fn main() {
    // stdout is the policy protocol channel; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let mut config_path = format!("/etc/{}.toml", env!("CARGO_PKG_NAME"));
    let mut perform_db_setup = false;

    let args = env::args().collect::<Vec<_>>();
    let mut idx = 1;
    while idx < args.len() {
        match args[idx].as_str() {
            "setup" => perform_db_setup = true,
            "--conf" => {
                idx += 1;
                match args.get(idx) {
                    Some(path) => config_path = path.clone(),
                    None => usage(),
                }
            }
            "--version" => {
                println!("{}", env!("CARGO_PKG_VERSION"));
                return;
            }
            _ => usage(),
        }
        idx += 1;
    }

    let settings = Settings::new(&config_path).unwrap_or_else(|e| {
        eprintln!("unable to parse configuration file {config_path}: {e}");
        eprintln!("try passing the correct path of your configuration file with the --conf option");
        process::exit(1);
    });

    let db = Database::connect(settings.get_db_url())
        .await
        .expect("unable to connect to the greylist database");

    if perform_db_setup {
        Migrator::up(&db, None)
            .await
            .expect("unable to create the greylist schema");
        info!("greylist schema is up to date");
        return;
    }

    let policy = RetryPolicy {
        max_attempts: settings.get_retry_max_attempts(),
        delay: settings.get_retry_delay(),
    };
    let store = RetryingStore::new(SeaOrmStore::new(db), policy);

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    tokio::select! {
        served = server::serve(stdin, stdout, &store, &settings) => {
            if let Err(e) = served {
                error!("greylist: request channel failed: {e}");
                process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("greylist: caught sigint, terminating ...");
        }
    }
}
