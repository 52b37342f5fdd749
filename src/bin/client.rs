use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use raftkv::config::ClientConfig;
use raftkv::kv::client::Clerk;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "client".to_string());
    let config = ClientConfig::load(&config_path)?;
    let addresses: Vec<String> = config.servers.iter().map(|s| s.address.clone()).collect();
    let mut clerk = Clerk::new(&addresses)?;

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("raftkv> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                if let Err(e) = handle_line(&mut clerk, &line).await {
                    println!("error: {e}");
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                println!("readline error: {e}");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_line(clerk: &mut Clerk, line: &str) -> raftkv::Result<()> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("get") => {
            let key = parts.next().unwrap_or_default();
            match clerk.get(key).await? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(nil)"),
            }
        }
        Some("put") => {
            let key = parts.next().unwrap_or_default().to_string();
            let value: String = parts.collect::<Vec<_>>().join(" ");
            clerk.put(&key, value.into_bytes()).await?;
            println!("ok");
        }
        Some("append") => {
            let key = parts.next().unwrap_or_default().to_string();
            let value: String = parts.collect::<Vec<_>>().join(" ");
            clerk.append(&key, value.into_bytes()).await?;
            println!("ok");
        }
        Some("quit") | Some("exit") => std::process::exit(0),
        Some(other) => println!("unknown command: {other}"),
        None => {}
    }
    Ok(())
}
