//! Table and JSON rendering for command output.

use serde::Serialize;

use crate::core::mcp::protocol::{
    GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use crate::core::mcp::{Listing, ServerStatus, Tagged};

const DESCRIPTION_WIDTH: usize = 60;

/// Print `value` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Report servers that could not be listed.
pub fn print_listing_errors<T>(listing: &Listing<T>) {
    for (server, error) in &listing.errors {
        eprintln!("warning: {server}: {error}");
    }
}

fn truncate(text: Option<&str>) -> String {
    let text = text.unwrap_or("").lines().next().unwrap_or("");
    if text.chars().count() > DESCRIPTION_WIDTH {
        let head: String = text.chars().take(DESCRIPTION_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub fn servers_table(servers: &[ServerStatus]) -> String {
    let mut out = format!(
        "{:<20} {:<14} {:<9} {:<7} {:<10} Endpoint\n",
        "Name", "Transport", "Priority", "Auth", "Connected"
    );
    out.push_str(&"-".repeat(80));
    out.push('\n');
    for server in servers {
        out.push_str(&format!(
            "{:<20} {:<14} {:<9} {:<7} {:<10} {}\n",
            server.name,
            server.transport,
            server.priority,
            server.auth,
            if server.connected { "yes" } else { "no" },
            server.endpoint
        ));
    }
    out
}

pub fn tools_table(tools: &[Tagged<Tool>]) -> String {
    rows(
        "Tool",
        tools
            .iter()
            .map(|t| (&t.server, t.item.name.as_str(), t.item.description.as_deref())),
    )
}

pub fn resources_table(resources: &[Tagged<Resource>]) -> String {
    rows(
        "URI",
        resources
            .iter()
            .map(|r| (&r.server, r.item.uri.as_str(), r.item.description.as_deref())),
    )
}

pub fn templates_table(templates: &[Tagged<ResourceTemplate>]) -> String {
    rows(
        "Template",
        templates.iter().map(|t| {
            (
                &t.server,
                t.item.uri_template.as_str(),
                t.item.description.as_deref(),
            )
        }),
    )
}

pub fn prompts_table(prompts: &[Tagged<Prompt>]) -> String {
    rows(
        "Prompt",
        prompts
            .iter()
            .map(|p| (&p.server, p.item.name.as_str(), p.item.description.as_deref())),
    )
}

fn rows<'a>(
    heading: &str,
    items: impl Iterator<Item = (&'a String, &'a str, Option<&'a str>)>,
) -> String {
    let mut out = format!("{:<20} {:<32} Description\n", "Server", heading);
    out.push_str(&"-".repeat(80));
    out.push('\n');
    for (server, name, description) in items {
        out.push_str(&format!(
            "{server:<20} {name:<32} {}\n",
            truncate(description)
        ));
    }
    out
}

pub fn resource_text(result: &ReadResourceResult) -> String {
    result
        .contents
        .iter()
        .map(|c| {
            c.text.clone().unwrap_or_else(|| {
                format!(
                    "[binary {}: {}]",
                    c.mime_type.as_deref().unwrap_or("application/octet-stream"),
                    c.uri
                )
            })
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn prompt_text(result: &GetPromptResult) -> String {
    let mut out = String::new();
    if let Some(description) = &result.description {
        out.push_str(description);
        out.push_str("\n\n");
    }
    for message in &result.messages {
        out.push_str(&format!("{}: {}\n", message.role, message.content.to_text()));
    }
    out
}
