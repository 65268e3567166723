//! Frame resolution example - find every iframe on a page and resolve it
//!
//! Usage: frame_resolution <page ws url> <browser ws url>

use devtools::cdp::CDPRequest;
use devtools::{BrowserSession, SessionConfig};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let page_url = args
        .next()
        .ok_or("usage: frame_resolution <page ws url> <browser ws url>")?;
    let mut config = SessionConfig::new(page_url);
    if let Some(browser_url) = args.next() {
        config = config.with_browser_url(browser_url);
    }

    let session = BrowserSession::new(config)?;
    session.start().await?;

    // Collect iframe elements of the top-level document
    let found = session
        .client()
        .send_request(
            "Runtime.evaluate",
            Some(json!({ "expression": "Array.from(document.querySelectorAll('iframe'))" })),
            None,
        )
        .await?;
    let Some(array_id) = found["result"]["objectId"].as_str() else {
        println!("No iframes");
        return Ok(());
    };

    let properties = session
        .client()
        .send_request(
            "Runtime.getProperties",
            Some(json!({ "objectId": array_id, "ownProperties": true })),
            None,
        )
        .await?;

    let object_ids: Vec<String> = properties["result"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|property| property["name"].as_str().is_some_and(|name| name.parse::<usize>().is_ok()))
        .filter_map(|property| property["value"]["objectId"].as_str().map(str::to_string))
        .collect();
    println!("Found {} iframes", object_ids.len());

    for object_id in object_ids {
        let iframe = session.element(object_id, "IFRAME");
        match iframe.resolve_frame_context().await {
            Ok(context) => {
                println!(
                    "frame {} ({}) out-of-process: {} session: {:?}",
                    context.frame_id,
                    context.document_url.as_deref().unwrap_or("about:blank"),
                    context.is_out_of_process(),
                    context.session_id
                );

                // Commands on the handle now run inside the frame
                let title = iframe
                    .execute(CDPRequest::new("Runtime.evaluate").with_params(json!({
                        "expression": "document.title",
                        "contextId": context.execution_context_id,
                        "returnByValue": true,
                    })))
                    .await?;
                println!("  title: {}", title["result"]["value"]);
            }
            Err(e) => println!("unresolved iframe: {}", e),
        }
    }

    session.stop().await?;
    Ok(())
}
