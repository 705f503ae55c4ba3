use async_trait::async_trait;
use std::error::Error;

pub mod deobfuscate;

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}
