use clap::{Parser, Subcommand};
use confdb::catalog::ConfigurationPath;
use confdb::config::AppConfig;
use confdb::model::{Directory, Id};
use confdb::store::Store;
use confdb::{seed, ConfDb, ConfDbError, MemoryStore, PostgresStore, SaveRequest};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "confdb")]
#[command(about = "Versioned pipeline configuration database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configuration names, optionally below a directory prefix.
    List { prefix: Option<String> },

    /// Show the version history of `dir/name`.
    Versions { config: String },

    /// List the software packages a configuration version uses.
    Packages { config: String },

    /// List known release tags.
    Releases,

    /// Print the directory tree.
    Tree,

    /// Print a configuration version as JSON.
    Show {
        config: String,

        /// Load only the templates the configuration references.
        #[arg(long)]
        partial: bool,
    },

    /// Take the advisory lock on `dir/name`.
    Lock { config: String, user: String },

    /// Release the lock on `dir/name`.
    Unlock {
        config: String,
        user: String,

        /// Remove the lock regardless of its holder.
        #[arg(long)]
        force: bool,
    },

    /// Save and reload the demo configuration against an in-memory store.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    if let Commands::Demo = cli.cmd {
        return run_demo(&config).await;
    }

    let database_url = config.database_url()?;
    let store = PostgresStore::connect(&database_url, config.max_connections()).await?;
    if config.database.migrate {
        log::info!("Running database migrations...");
        store.migrate().await?;
    }

    let db = ConfDb::open(Arc::new(store))
        .await?
        .with_release_cache(config.catalog.cache_releases);
    run(&db, cli.cmd).await
}

async fn run<S: Store + ?Sized>(db: &ConfDb<S>, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::List { prefix } => {
            let prefix = prefix.unwrap_or_default();
            for name in db.directories().configuration_names().await? {
                if name.starts_with(&prefix) {
                    println!("{}", name);
                }
            }
        }
        Commands::Versions { config } => {
            let (info, _) = db.directories().resolve(&config).await?;
            if let Some(user) = &info.locked_by {
                println!("{} (locked by {})", info.full_name(), user);
            } else {
                println!("{}", info.full_name());
            }
            for v in &info.versions {
                println!(
                    "  V{:<4} {:>8}  {}  {}  {}  {}",
                    v.version,
                    v.id,
                    v.created_at.format("%Y-%m-%d %H:%M:%S"),
                    v.release_tag,
                    v.creator,
                    v.comment
                );
            }
        }
        Commands::Packages { config } => {
            let id = db.directories().resolve_configuration_id(&config).await?;
            let release = db.catalog().load_partial_release(id).await?.value;
            let mut packages: Vec<&str> = release
                .templates()
                .filter_map(|t| release.package_of(t.id))
                .collect();
            packages.sort_unstable();
            packages.dedup();
            for package in packages {
                println!("{}", package);
            }
        }
        Commands::Releases => {
            for tag in db.catalog().list_release_tags().await? {
                println!("{}", tag);
            }
        }
        Commands::Tree => {
            let tree = db.directories().load_tree().await?;
            print_tree(&tree.value, 0);
        }
        Commands::Show { config, partial } => {
            let id = db.directories().resolve_configuration_id(&config).await?;
            let loaded = if partial {
                db.load_configuration_partial(id).await?
            } else {
                db.load_configuration(id).await?
            };
            println!("{}", serde_json::to_string_pretty(&loaded.value)?);
            if !loaded.is_clean() {
                eprintln!("{} warning(s) while loading", loaded.warnings.len());
            }
        }
        Commands::Lock { config, user } => {
            let (directory_id, name) = locate(db, &config).await?;
            db.directories().lock(directory_id, &name, &user).await?;
            println!("{} locked by {}", config, user);
        }
        Commands::Unlock { config, user, force } => {
            let (directory_id, name) = locate(db, &config).await?;
            if force {
                match db.directories().break_lock(directory_id, &name).await? {
                    Some(holder) => println!("Lock of {} on {} removed", holder, config),
                    None => println!("{} was not locked", config),
                }
            } else {
                db.directories().unlock(directory_id, &name, &user).await?;
                println!("{} unlocked", config);
            }
        }
        Commands::Demo => anyhow::bail!("the demo runs against an in-memory store"),
    }
    Ok(())
}

async fn locate<S: Store + ?Sized>(db: &ConfDb<S>, full_name: &str) -> anyhow::Result<(Id, String)> {
    let parsed = ConfigurationPath::parse(full_name)
        .ok_or_else(|| ConfDbError::not_found("locate configuration", full_name.to_string()))?;
    let directory_id = db.directories().find_directory(&parsed.directory).await?;
    Ok((directory_id, parsed.name))
}

fn print_tree(dir: &Directory, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{}", indent, if depth == 0 { "/" } else { dir.name.as_str() });
    for info in &dir.configurations {
        let latest = info.latest().map(|v| v.version).unwrap_or_default();
        let lock = info.locked_by.as_deref().map(|u| format!(" [{}]", u)).unwrap_or_default();
        println!("{}  {} (V{}){}", indent, info.name, latest, lock);
    }
    for child in &dir.children {
        print_tree(child, depth + 1);
    }
}

async fn run_demo(config: &AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed::seed_demo_release(&store)?;

    let db = ConfDb::open(store.clone())
        .await?
        .with_release_cache(config.catalog.cache_releases);
    let group = db
        .directories()
        .create_directory(store.root_directory_id(), "Demo")
        .await?;
    let release = db.release(seed::DEMO_RELEASE).await?.value;
    let mut demo = seed::demo_configuration(&release, group.id)?;

    let request = SaveRequest::new("demo", "HLT").with_comment("initial import");
    let v1 = db.save_configuration(&mut demo, &request).await?;
    log::info!("Saved {}/{} V{} as {}", group.path, demo.name, v1.version, v1.id);

    let loaded = db.load_configuration(v1.id).await?;
    println!("{}", serde_json::to_string_pretty(&loaded.value)?);
    Ok(())
}
