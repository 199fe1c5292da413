//! Demo server: two in-memory tables, one per protocol.
//!
//! - `/`      column-mode people table, key-addressed messages
//! - `/roles` role-mode task table, row-based messages
//!
//! A background producer bumps a counter on the people table every few
//! seconds so connected clients see live changes, and server statistics
//! are logged as JSON once a minute. Set `ROWSYNC_BIND` to change the
//! listen address and `RUST_LOG` to control verbosity.

use std::time::Duration;

use log::info;
use rowsync_core::{share, AdapterConfig, FieldRef, MemoryTable, Protocol, TableModel, TableView};
use rowsync_server::{ModelServer, ServerConfig, ServerError};
use serde_json::json;

const TITLE_ROLE: u32 = 257;
const DONE_ROLE: u32 = 258;
const ID_ROLE: u32 = 256;

fn people() -> MemoryTable {
    MemoryTable::from_rows(
        vec!["id", "name", "visits"],
        vec![
            vec![json!(1), json!("Ada"), json!(0)],
            vec![json!(2), json!("Brian"), json!(0)],
            vec![json!(3), json!("Grace"), json!(0)],
        ],
    )
}

fn tasks() -> MemoryTable {
    MemoryTable::with_roles(vec![(ID_ROLE, "id"), (TITLE_ROLE, "title"), (DONE_ROLE, "done")])
        .with_rows(vec![
            vec![json!("t1"), json!("Write the parser"), json!(true)],
            vec![json!("t2"), json!("Wire up the server"), json!(false)],
        ])
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::init();

    let mut config = ServerConfig::default();
    if let Ok(bind) = std::env::var("ROWSYNC_BIND") {
        config.bind_addr = bind;
    }

    let people = share(people());
    let tasks = share(tasks());

    let mut server = ModelServer::new(config);
    server.serve_model("/", people.clone(), AdapterConfig::default());
    server.serve_model(
        "/roles",
        tasks,
        AdapterConfig::keyed_by(FieldRef::Role(ID_ROLE)).with_protocol(Protocol::RowBased),
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        let mut row = 0;
        loop {
            ticker.tick().await;
            let mut table = people.lock();
            if table.row_count() == 0 {
                continue;
            }
            row = (row + 1) % table.row_count();
            let visits = table.field_value(row, FieldRef::Column(2)).as_u64().unwrap_or(0);
            if let Err(e) = table.set_field_value(row, FieldRef::Column(2), json!(visits + 1)) {
                log::error!("Producer update failed: {e}");
            }
        }
    });

    info!("Starting rowsync demo...");
    let listening = server.listen().await?;
    let handle = listening.handle();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let stats = handle.stats().await;
            let fan_out = handle.broadcast_stats("/");
            match serde_json::to_string(&json!({"server": stats, "people": fan_out})) {
                Ok(line) => info!("stats {line}"),
                Err(e) => log::warn!("Could not encode stats: {e}"),
            }
        }
    });
    listening.run().await
}
