use crate::config::DbConfig;
use log::info;
use mongodb::{Client, Database};

pub async fn connect_to_database(config: &DbConfig) -> mongodb::error::Result<Database> {
    let client = Client::with_uri_str(&config.uri).await?;
    info!("Connected to MongoDB, using database {}", config.database);
    Ok(client.database(&config.database))
}
