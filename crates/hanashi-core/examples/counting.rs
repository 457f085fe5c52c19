//! Build a three-message tree and watch the assistant count from 0 to 9
//! while its content is persisted behind the scenes.
//!
//! Run with: `cargo run --example counting`

use std::sync::Arc;
use std::time::Duration;

use hanashi_core::{
    AppendOptions, Conversation, MemoryRecordStore, RecordStore, ScriptedGenerator,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(MemoryRecordStore::new());
    let generator = Arc::new(ScriptedGenerator::counting().with_delay(Duration::from_millis(200)));
    let conv = Conversation::new(Arc::clone(&store) as Arc<dyn RecordStore>, generator);

    let root = conv
        .append(None, AppendOptions::system("You are a helpful assistant."))
        .await?;
    println!("{root:?}");
    let user = conv
        .append(Some(root.id()), AppendOptions::user("Count from 0 to 9."))
        .await?;
    println!("{user:?}");
    let assistant = conv
        .append(Some(user.id()), AppendOptions::assistant())
        .await?;
    println!("{assistant:?}");

    let mut stream = assistant
        .stream()
        .expect("a fresh assistant message has a stream");
    while let Some(fragment) = stream.next().await {
        println!(
            "status: {:?}  fragment: {fragment:?}  content so far: {:?}",
            assistant.status(),
            assistant.content()
        );
    }

    assistant.sync().await?;
    println!("final: {assistant:?}");
    Ok(())
}
