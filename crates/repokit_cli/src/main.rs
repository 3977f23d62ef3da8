//! CLI smoke entry point.
//!
//! # Responsibility
//! - Run the add/rename/remove scenario against every shipped store.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `repokit_cli [absolute-log-dir]`

use log::info;
use repokit_core::{
    default_log_level, init_logging, Entity, EntityMapping, MemoryStore, Repository,
    SqliteConfig, SqliteStore, Store, UnitOfWork,
};
use serde::{Deserialize, Serialize};
use std::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Widget {
    id: String,
    name: String,
}

impl Entity for Widget {
    type Key = String;
    const COLLECTION: &'static str = "widgets";

    fn key(&self) -> &String {
        &self.id
    }

    fn set_key(&mut self, key: String) {
        self.id = key;
    }
}

fn widget(id: &str) -> Widget {
    Widget {
        id: id.to_string(),
        name: id.to_string(),
    }
}

fn run_scenario<S: Store<Widget> + 'static>(label: &str, store: S) -> Result<(), Box<dyn Error>> {
    let unit_of_work = UnitOfWork::new();
    let repository = Repository::with_unit_of_work(store, &unit_of_work);

    repository.add(widget("TEST_1"))?;
    repository.add(widget("TEST_2"))?;
    println!(
        "{label}: staged={} committed={}",
        unit_of_work.len(),
        repository.count_all(None)?
    );
    unit_of_work.commit()?;
    println!("{label}: count_all={}", repository.count_all(None)?);

    let mut renamed = widget("TEST_2");
    renamed.name = "TEST_2 (UPDATED)".to_string();
    repository.set("TEST_2".to_string(), renamed)?;
    repository.remove(widget("TEST_1"))?;
    let report = unit_of_work.commit()?;
    info!(
        "event=cli_scenario module=cli status=ok store={} applied={}",
        label,
        report.len()
    );

    for found in repository.find_all(0, usize::MAX, None)? {
        println!("{label}: {} => {}", found.id, found.name);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = std::env::args().nth(1) {
        init_logging(default_log_level(), log_dir)?;
    }

    println!("repokit_core version={}", repokit_core::core_version());
    run_scenario("memory", MemoryStore::<Widget>::for_entity()?)?;
    run_scenario(
        "sqlite",
        SqliteStore::<Widget>::open(SqliteConfig::memory(), EntityMapping::of::<Widget>()?),
    )?;
    Ok(())
}
