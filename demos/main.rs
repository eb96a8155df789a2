use tablesync::*;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer: String,
    pub total: i32,
}

fn order_tables() -> Vec<TableSchema> {
    vec![
        TableSchema::new("orders")
            .column(ColumnSchema::typed("customer", ColumnType::String).not_null())
            .column(ColumnSchema::typed("total", ColumnType::Integer).default_value(0)),
        TableSchema::new("order_lines")
            .column(ColumnSchema::typed("orderId", ColumnType::Uuid).not_null())
            .column(ColumnSchema::typed("sku", ColumnType::String)),
    ]
}

/// Usage: `cargo run --example main [definitions-dir]`
///
/// Reads `DB_*` variables for the connection, creates the
/// `order_management` database if needed, syncs tables and runs a few
/// commands.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let helper = DbHelper::new(Config::from_env()?.with_database("order_management"));
    helper.initialize().await?;

    let report = match std::env::args().nth(1) {
        Some(dir) => helper.load_tables(&DirectorySource::new(dir)).await?,
        None => helper.load_tables(&order_tables()).await?,
    };
    println!("schema changes: {}", report.mutations());

    let orders = Table::<Order>::new(&helper, "orders");
    let id = orders
        .insert(&Order {
            id: uuid::Uuid::new_v4().to_string(),
            customer: "Ada".into(),
            total: 42,
        })
        .await?;

    let ada = orders.first(json!({ "id": id })).await?;
    println!("{:?}", ada);

    let page = helper
        .execute(serde_json::from_value(json!({
            "commandName": "list",
            "tableName": "orders",
            "page": 1,
            "pageSize": 10
        }))?)
        .await?;
    println!("first page: {}", serde_json::to_string(&page)?);

    helper
        .run(&Command::raw("DELETE FROM \"orders\" WHERE \"customer\" = 'Ada'"))
        .await?;

    Ok(())
}
