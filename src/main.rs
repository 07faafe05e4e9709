//! Binary entrypoint for the protospawn CLI.
//!
//! Commands:
//! - `init` - write a starter config file
//! - `load <file.json>` - normalize, validate and save prototypes from a JSON file
//! - `list [--key K] [--tag T]` - search stored and module prototypes
//! - `show <key> [--flat]` - print a prototype, optionally with its parents merged in
//! - `validate <key> [--mixin]` - check a prototype and its parent chain
//! - `spawn <key>... [--dry-run] [--caller #N]` - create entities
//! - `diff <key> <entity>` - compare an entity against a prototype
//! - `update <key> [--exact]` - push prototype changes to spawned instances
//! - `delete <key>` - remove a stored prototype
//! - `eval <expr>` - preview an embedded-function expression
//!
//! See the library crate docs for module-level details: `protospawn::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use protospawn::config::Config;
use protospawn::logutil::preview;
use protospawn::prototype::{
    authorize_exec, batch_update, describe_diff, diff_against_entity, evaluate_for_testing,
    flatten, flatten_diff, load_module_library, load_prototypes_from_json, validate, Actor,
    BatchOptions, DiffInstruction, DiffOptions, EntityWorld, ProtFuncContext, ProtoStore,
    ProtoStoreBuilder, PrototypeSource, Registry, SpawnInput, SpawnOptions, SpawnOutcome,
    Spawner, ValidateOptions, Value,
};

#[derive(Parser)]
#[command(name = "protospawn")]
#[command(about = "Prototype engine for text worlds: templates, spawning, diffs and batch updates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "protospawn.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Permission held by the acting user (repeatable); defaults to Developer
    #[arg(long = "perm", global = true)]
    perms: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Load prototypes from a JSON file into the store
    Load {
        file: String,
    },
    /// List prototypes
    List {
        /// Key to match (exact first, then substring)
        #[arg(short, long)]
        key: Option<String>,
        /// Required prototype tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Show one prototype as JSON
    Show {
        key: String,
        /// Merge the parent chain into the output
        #[arg(long)]
        flat: bool,
    },
    /// Validate a prototype and its parents
    Validate {
        key: String,
        /// Validate as a mixin (warnings are informational)
        #[arg(long)]
        mixin: bool,
    },
    /// Spawn entities from one or more prototypes
    Spawn {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Build and validate everything but create nothing
        #[arg(long)]
        dry_run: bool,
        /// `#N` of the spawning entity
        #[arg(long)]
        caller: Option<String>,
    },
    /// Diff an entity against a prototype
    Diff {
        key: String,
        entity: String,
        /// Also list unchanged fields
        #[arg(long)]
        all: bool,
    },
    /// Apply a prototype to every entity spawned from it
    Update {
        key: String,
        /// Also clear fields the prototype does not mention
        #[arg(long)]
        exact: bool,
    },
    /// Delete a stored prototype
    Delete {
        key: String,
    },
    /// Evaluate an expression in preview mode
    Eval {
        expr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} (using defaults)", e);
            Config::default()
        }
    };
    init_logging(&Some(config.clone()), cli.verbose);

    let actor = actor_from(&cli.perms, None);
    let registry = Registry::from_config(&config.spawner);

    // eval needs no store
    if let Commands::Eval { expr } = &cli.command {
        let ctx = ProtFuncContext::new(&registry.functions);
        let (error, result) = evaluate_for_testing(&Value::str(expr.clone()), &ctx);
        debug!("eval {} -> {}", preview(&Value::str(expr.clone())), preview(&result));
        println!("{}", result.repr());
        if let Some(error) = error {
            println!("warning: {}", error);
        }
        return Ok(());
    }

    let store = open_store(&config, &registry)?;

    match cli.command {
        Commands::Init | Commands::Eval { .. } => {}
        Commands::Load { file } => {
            let prototypes = load_prototypes_from_json(
                &file,
                &registry.custom_reserved_keys,
                &registry.base_typeclass,
            )?;
            let mut failed = 0;
            for prototype in prototypes {
                let name = prototype.display_name();
                match store.save_prototype(prototype, &actor) {
                    Ok(_) => println!("saved {}", name),
                    Err(e) => {
                        failed += 1;
                        println!("skipped {}: {}", name, e);
                    }
                }
            }
            if failed > 0 {
                warn!("{} prototype(s) from {} were not saved", failed, file);
            }
        }
        Commands::List { key, tags } => {
            let found = store.search_prototypes(key.as_deref(), &tags)?;
            if found.is_empty() {
                println!("No prototypes found.");
            }
            for proto in found {
                let key = proto.display_name();
                let marker = if store.is_read_only(&key) { " [module]" } else { "" };
                println!(
                    "{}{} - {} {:?}",
                    key,
                    marker,
                    proto.prototype_desc.as_deref().unwrap_or(""),
                    proto.prototype_tags.unwrap_or_default()
                );
            }
        }
        Commands::Show { key, flat } => {
            let proto = store.find_prototype(&key)?;
            let proto = if flat { flatten(&proto, &store)? } else { proto };
            println!("{}", serde_json::to_string_pretty(&proto.to_json())?);
        }
        Commands::Validate { key, mixin } => {
            let mut proto = store.find_prototype(&key)?;
            let options = if mixin {
                ValidateOptions::mixin()
            } else {
                ValidateOptions::default()
            };
            match validate(&mut proto, None, &store, &registry.typeclasses, options) {
                Ok(()) => println!("{} is valid.", proto.display_name()),
                Err(e) if e.is_warning() && mixin => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Spawn {
            keys,
            dry_run,
            caller,
        } => {
            let actor = actor_from(&cli.perms, caller.as_deref());
            let mut inputs = Vec::with_capacity(keys.len());
            for key in &keys {
                let proto = store.find_prototype(key)?;
                let proto_key = proto.display_name();
                if !store.check_permission(&proto_key, "spawn", &actor)? {
                    return Err(anyhow!("no spawn access to prototype {}", proto_key));
                }
                authorize_exec(&flatten(&proto, &store)?, &actor, &config.spawner.exec_permission)?;
                inputs.push(SpawnInput::Key(proto_key));
            }

            let options = SpawnOptions {
                caller: caller.clone(),
                only_validate: dry_run,
                raise_on_bad_function: config.spawner.raise_on_bad_function,
                default_home: config.spawner.default_home.clone(),
                ..Default::default()
            };
            let spawner = Spawner::new(&registry, &store, &store);
            match spawner.spawn(&inputs, &options)? {
                SpawnOutcome::Created(entities) => {
                    for entity in entities {
                        println!("created {} '{}'", entity.id, entity.key);
                    }
                }
                SpawnOutcome::Validated(bundles) => {
                    for bundle in bundles {
                        println!(
                            "would create '{}' ({}) from {}",
                            bundle.core.key, bundle.core.typeclass, bundle.prototype_key
                        );
                    }
                }
            }
        }
        Commands::Diff { key, entity, all } => {
            let proto = flatten(&store.find_prototype(&key)?, &store)?;
            let entity = store.get_entity(&entity)?;
            let options = DiffOptions {
                max_depth: config.spawner.diff_max_depth,
                ..Default::default()
            };
            let (tree, _) = diff_against_entity(&proto, &entity, &options)?;
            for line in describe_diff(&tree, all) {
                println!("{}", line);
            }
            for (field, instruction) in flatten_diff(&tree) {
                if all || instruction != DiffInstruction::Keep {
                    println!("{:>16}: {}", field, instruction);
                }
            }
        }
        Commands::Update { key, exact } => {
            let proto = store.find_prototype(&key)?;
            let options = BatchOptions {
                exact,
                ..Default::default()
            };
            let report = batch_update(&proto, &registry, &store, &store, options)?;
            println!(
                "{} changed, {} unchanged, {} failed",
                report.count(),
                report.unchanged.len(),
                report.failures.len()
            );
            for (id, error) in &report.failures {
                println!("  {}: {}", id, error);
            }
        }
        Commands::Delete { key } => {
            if store.delete_prototype(&key, &actor)? {
                println!("deleted {}", key);
            } else {
                println!("no stored prototype named {}", key);
            }
        }
    }

    Ok(())
}

fn actor_from(perms: &[String], id: Option<&str>) -> Actor {
    if perms.is_empty() {
        return Actor {
            id: id.map(str::to_string),
            ..Actor::operator()
        };
    }
    Actor {
        id: id.map(str::to_string),
        permissions: perms.to_vec(),
    }
}

fn open_store(config: &Config, registry: &Registry) -> Result<ProtoStore> {
    let modules = load_module_library(
        &config.spawner.prototype_modules,
        &registry.custom_reserved_keys,
        &registry.base_typeclass,
    )?;
    let store = ProtoStoreBuilder::new(&config.storage.data_dir)
        .with_module_prototypes(modules)
        .with_typeclasses(registry.typeclasses.clone())
        .open()?;
    Ok(store)
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Echo to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
