use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use weft::config::RuntimeConfig;
use weft::runtime::Runtime;
use weft::scheduler::{Scheduler, TokioTick};
use weft::store::{FileStorage, KvStorage, MemoryStorage, Store};
use weft::vtree::TreeNode;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Reactive state store and virtual-tree runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/weft/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a counter through store, scheduler and reconciler
    Demo {
        /// Number of simulated clicks
        #[arg(short = 'n', long, default_value = "3")]
        clicks: u32,

        /// Keep the counter in the persisted store between runs
        #[arg(short, long)]
        persist: bool,
    },

    /// Inspect or reset the persisted store record
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Print the persisted state
    Show,
    /// Delete the persisted state
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    weft::logging::init_tracing(if cli.verbose { "debug" } else { "warn" });

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load_from(path)?,
        None => RuntimeConfig::load()?,
    };

    match cli.command {
        Commands::Demo { clicks, persist } => run_demo(&config, clicks, persist).await,
        Commands::State { action } => run_state(&config, action),
    }
}

fn file_storage(config: &RuntimeConfig) -> FileStorage {
    let dir = config
        .store
        .data_dir
        .clone()
        .unwrap_or_else(FileStorage::default_dir);
    FileStorage::new(dir)
}

async fn run_demo(config: &RuntimeConfig, clicks: u32, persist: bool) -> Result<()> {
    let tick = TokioTick::current(config.scheduler.frame_interval())
        .context("demo must run inside a tokio runtime")?;
    let storage: Arc<dyn KvStorage> = if persist {
        Arc::new(file_storage(config))
    } else {
        Arc::new(MemoryStorage::new())
    };

    let initial = json!({"value": 0, "history": []});
    let store = Store::open(
        Scheduler::new(tick),
        storage,
        config.store.clone(),
        json!({ "counter": initial.clone() }),
    );
    store.create_namespace("counter", initial)?;

    let runtime = Runtime::headless(store.clone());
    let container = runtime.live().root();
    let view = runtime.mount(container, &["counter"], render_counter)?;
    println!("{}", runtime.live().root_markup());

    let button = runtime
        .view_handle(view)
        .and_then(|top| runtime.live().find_tag(top, "button"))
        .context("counter view rendered no button")?;

    // Long enough for the debounce window plus the frames that follow it.
    let settle = config.store.debounce() + config.scheduler.frame_interval() * 3;
    for _ in 0..clicks {
        runtime.fire(button, "click");
        tokio::time::sleep(settle).await;
        println!("{}", runtime.live().root_markup());
    }

    if persist {
        store.save_state()?;
        println!("Saved under '{}'", config.store.storage_key);
    }
    Ok(())
}

fn render_counter(store: &Store) -> TreeNode {
    let value = store
        .get_state("counter.value")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let history = store
        .get_state("counter.history")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();

    let writer = store.clone();
    let increment = move || {
        let result = writer.update_state("counter", |current| {
            let next = current["value"].as_i64().unwrap_or(0) + 1;
            let mut history = current["history"].as_array().cloned().unwrap_or_default();
            history.insert(0, json!(next));
            history.truncate(3);
            json!({"value": next, "history": history})
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "Increment failed");
        }
    };

    TreeNode::new("div")
        .prop("class", "counter")
        .child(TreeNode::new("span").text(format!("Count: {value}")))
        .child(TreeNode::new("button").on("click", increment).text("+1"))
        .child(TreeNode::new("ul").children(history.iter().map(|entry| {
            let label = entry.to_string();
            TreeNode::new("li").key(label.clone()).text(label)
        })))
}

fn run_state(config: &RuntimeConfig, action: StateAction) -> Result<()> {
    let storage = file_storage(config);
    let key = &config.store.storage_key;
    let path = storage.path_for(key)?;

    match action {
        StateAction::Show => match storage.get(key)? {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)
                    .with_context(|| format!("'{}' does not hold valid JSON", path.display()))?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            None => println!("No persisted state at {}", path.display()),
        },
        StateAction::Clear => {
            storage.remove(key)?;
            println!("Cleared {}", path.display());
        }
    }
    Ok(())
}
