//! Basic CDP example - connecting, issuing commands, listening for events

use devtools::cdp::CDPClient;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Connect to Chrome
    let cdp_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    println!("Connecting to Chrome at: {}", cdp_url);

    let client = CDPClient::connect(&cdp_url).await?;
    println!("Connected!");

    let mut lifecycle = client.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle.recv().await {
            println!("Connection: {:?}", event);
        }
    });

    // Get browser version
    let version_result = client
        .send_request("Browser.getVersion", None, None)
        .await?;

    println!("Browser version: {}", version_result["product"]);

    // Subscribe to target events before turning discovery on
    client.subscribe("Target.targetCreated", |event| {
        let url = event
            .params
            .as_ref()
            .and_then(|params| params["targetInfo"]["url"].as_str())
            .unwrap_or_default();
        println!("Target created: {}", url);
    });
    client
        .send_request(
            "Target.setDiscoverTargets",
            Some(json!({ "discover": true })),
            None,
        )
        .await?;

    // List targets
    let targets_result = client.send_request("Target.getTargets", None, None).await?;
    let count = targets_result["targetInfos"]
        .as_array()
        .map(Vec::len)
        .unwrap_or_default();
    println!("Targets: {}", count);

    // Keep alive for a bit to see events
    tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;

    // Clean shutdown
    client.close().await?;
    println!("Disconnected");

    Ok(())
}
