use std::collections::HashMap;
use std::io::Write;

use anyhow::Context;
use console::{Emoji, style};
use dialoguer::{Confirm, Input, Select};
use powerflow_core::{ApiError, ApiErrorClass, DatabaseSummary, NotionClient, PropertyKind};
use tracing::debug;

use crate::config::{Config, ConfigPaths, PropertyMap};
use crate::credentials::{ApiKeyKind, CredentialChain, KeySource, ResolvedKey};
use crate::sync::{ClientLimiters, notion_client, pocket_client};

const TITLE_FALLBACK: &str = "Name";
const PRIORITY_CANDIDATES: [&str; 1] = ["Priority"];
const DUE_DATE_CANDIDATES: [&str; 3] = ["Due Date", "Due", "DueDate"];
const DEDUP_CANDIDATES: [&str; 4] = ["Inbox ID", "pocket_id", "Pocket ID", "Source ID"];
const CONTEXT_CANDIDATES: [&str; 5] = ["Next step", "Notes", "Description", "Details", "Context"];
const SOURCE_CANDIDATES: [&str; 4] = ["Source", "URL", "Link", "Recording"];
const TAG_CANDIDATES: [&str; 3] = ["Tags", "Labels", "Categories"];

static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static CHART: Emoji<'_, '_> = Emoji("📊 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "+ ");
static PLUS: Emoji<'_, '_> = Emoji("➕ ", "* ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedField {
    pub field: &'static str,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedProperty {
    pub field: &'static str,
    pub column: String,
    pub kind: PropertyKind,
}

/// How recording fields land in an existing database, and which columns
/// have to be added first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingPlan {
    pub property_map: PropertyMap,
    pub existing: Vec<MappedField>,
    pub to_create: Vec<PlannedProperty>,
}

impl MappingPlan {
    pub fn required(&self) -> Vec<(String, PropertyKind)> {
        self.to_create
            .iter()
            .map(|p| (p.column.clone(), p.kind))
            .collect()
    }
}

struct Planner<'a> {
    schema: &'a HashMap<String, PropertyKind>,
    existing: Vec<MappedField>,
    to_create: Vec<PlannedProperty>,
}

impl Planner<'_> {
    fn find(
        &mut self,
        field: &'static str,
        candidates: &[&str],
        kind: PropertyKind,
    ) -> Option<String> {
        let column = candidates
            .iter()
            .find(|name| self.schema.get(**name) == Some(&kind))?
            .to_string();
        self.existing.push(MappedField {
            field,
            column: column.clone(),
        });
        Some(column)
    }

    fn find_or_create(
        &mut self,
        field: &'static str,
        candidates: &[&str],
        kind: PropertyKind,
        new_name: &str,
    ) -> String {
        if let Some(column) = self.find(field, candidates, kind) {
            return column;
        }
        let column = self.free_name(new_name);
        self.to_create.push(PlannedProperty {
            field,
            column: column.clone(),
            kind,
        });
        column
    }

    /// `name`, or a suffixed variant when a column of another type holds it.
    fn free_name(&self, name: &str) -> String {
        if !self.schema.contains_key(name) {
            return name.to_string();
        }
        (1..)
            .map(|n| match n {
                1 => format!("{name} (Power-Flow)"),
                n => format!("{name} (Power-Flow {n})"),
            })
            .find(|candidate| !self.schema.contains_key(candidate))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Matches recording fields to existing columns by conventional names and
/// types. The dedup key, context, source link and tags get new columns when
/// nothing suitable exists; priority and due date are only used if present.
pub fn plan_property_mapping(schema: &HashMap<String, PropertyKind>) -> MappingPlan {
    let mut planner = Planner {
        schema,
        existing: Vec::new(),
        to_create: Vec::new(),
    };

    let title = schema
        .iter()
        .find(|(_, kind)| **kind == PropertyKind::Title)
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| TITLE_FALLBACK.to_string());
    planner.existing.push(MappedField {
        field: "Title",
        column: title.clone(),
    });

    let priority = planner.find("Priority", &PRIORITY_CANDIDATES, PropertyKind::Select);
    let due_date = planner.find("Due Date", &DUE_DATE_CANDIDATES, PropertyKind::Date);
    let dedup_key = planner.find_or_create(
        "Dedup key",
        &DEDUP_CANDIDATES,
        PropertyKind::RichText,
        "Inbox ID",
    );
    let context = planner.find_or_create(
        "Context",
        &CONTEXT_CANDIDATES,
        PropertyKind::RichText,
        "Action Context",
    );
    let source_url =
        planner.find_or_create("Source", &SOURCE_CANDIDATES, PropertyKind::Url, "Source");
    let tags = planner.find_or_create("Tags", &TAG_CANDIDATES, PropertyKind::MultiSelect, "Tags");

    MappingPlan {
        property_map: PropertyMap {
            title,
            dedup_key,
            priority,
            due_date,
            context: Some(context),
            source_url: Some(source_url),
            tags: Some(tags),
        },
        existing: planner.existing,
        to_create: planner.to_create,
    }
}

/// Plain-language reason a key check failed.
pub fn describe_connection_error(kind: ApiKeyKind, err: &ApiError) -> String {
    match err.status().map(|status| status.as_u16()) {
        Some(401) => return "Invalid API key. Please check and try again.".to_string(),
        Some(403) => {
            return match kind {
                ApiKeyKind::Pocket => {
                    "API key doesn't have permission. Create a key with 'Read' access.".to_string()
                }
                ApiKeyKind::Notion => {
                    "API key doesn't have permission. Check your integration settings.".to_string()
                }
            };
        }
        _ => {}
    }
    if err.status().is_none() && err.classification() == Some(ApiErrorClass::Transient) {
        return format!("Can't connect to {kind} API. Check your internet connection.");
    }
    format!("API error: {err}")
}

fn step(message: &str) {
    print!("   {message}... ");
    let _ = std::io::stdout().flush();
}

fn key_hint(kind: ApiKeyKind) -> &'static str {
    match kind {
        ApiKeyKind::Pocket => {
            "Get yours from: Pocket App → Settings → Developers → API Keys → Create Secret Key"
        }
        ApiKeyKind::Notion => {
            "Get yours from: notion.so/my-integrations → New Integration, then share your database with it"
        }
    }
}

fn resolve_key(config: &Config, kind: ApiKeyKind) -> anyhow::Result<ResolvedKey> {
    if CredentialChain::non_interactive(config).resolve(kind).is_none() {
        println!("\n{} {kind} API key required", style("🔑").bold());
        println!("   {}", style(key_hint(kind)).dim());
    }
    CredentialChain::interactive(config).resolve(kind).with_context(|| {
        format!(
            "{kind} API key is required. Set {} or enter it when prompted.",
            kind.env_var()
        )
    })
}

/// Interactive first-run wizard. Safe to re-run: it picks up the existing
/// config and only adds missing columns.
pub async fn run_setup(paths: &ConfigPaths) -> anyhow::Result<()> {
    println!("\n{}{}\n", ROCKET, style("Power-Flow Setup").bold());
    paths.ensure_dir()?;
    let mut config = Config::load(&paths.config_file);
    let limiters = ClientLimiters::default();

    let pocket_key = resolve_key(&config, ApiKeyKind::Pocket)?;
    step("Checking Pocket API");
    let pocket = pocket_client(&pocket_key.value, &limiters)?;
    if let Err(err) = pocket.test_connection().await {
        println!("{}", style("✗").red());
        anyhow::bail!(describe_connection_error(ApiKeyKind::Pocket, &err));
    }
    println!("{}", style("✓").green());

    let notion_key = resolve_key(&config, ApiKeyKind::Notion)?;
    step("Checking Notion API");
    let notion = notion_client(&notion_key.value, &limiters)?;
    if let Err(err) = notion.test_connection().await {
        println!("{}", style("✗").red());
        anyhow::bail!(describe_connection_error(ApiKeyKind::Notion, &err));
    }
    println!("{}", style("✓").green());

    println!("\n{}Scanning for accessible databases...\n", BOOKS);
    let databases = notion
        .search_databases()
        .await
        .context("Failed to list databases")?;
    if databases.is_empty() {
        anyhow::bail!(
            "No databases found!\n\n   To fix this:\n   \
             1. Open a Notion database you want to sync to\n   \
             2. Click '...' menu → 'Connections'\n   \
             3. Add your integration (the one you created)\n   \
             4. Re-run this setup"
        );
    }
    let selected = select_database(&notion, &databases).await?;
    println!("\n{}Selected: {} {}", CHECK, selected.emoji, selected.title);

    println!("\n{}Analyzing schema...\n", CHART);
    let schema = notion
        .get_database_schema(&selected.id)
        .await
        .context("Failed to get database schema")?;
    let plan = plan_property_mapping(&schema);
    print_plan(&plan);

    if !plan.to_create.is_empty() {
        println!();
        let create = Confirm::new()
            .with_prompt("Create missing properties?")
            .default(true)
            .interact()?;
        if !create {
            anyhow::bail!(
                "Setup cancelled. Missing properties are required for sync. Run setup again when ready."
            );
        }
        let created = notion
            .ensure_properties_exist(&selected.id, &plan.required())
            .await
            .context("Failed to create property")?;
        for name in created {
            println!("   {}Created {name}", CHECK);
        }
    }

    config.notion.database_id = Some(selected.id.clone());
    config.notion.database_name = Some(selected.title.clone());
    config.notion.property_map = plan.property_map;
    offer_to_store_keys(&mut config, &pocket_key, &notion_key, paths)?;
    config.save(&paths.config_file)?;

    println!(
        "\n{}Config saved: {}",
        CHECK,
        style(paths.config_file.display()).dim()
    );
    println!(
        "\n{}Setup complete! Run 'powerflow sync' to start syncing.\n",
        PARTY
    );
    Ok(())
}

async fn select_database(
    notion: &NotionClient,
    databases: &[DatabaseSummary],
) -> anyhow::Result<DatabaseSummary> {
    let mut items: Vec<String> = databases
        .iter()
        .map(|db| format!("{} {}", db.emoji, db.title))
        .collect();
    items.push("[Enter ID manually]".to_string());

    loop {
        let choice = Select::new()
            .with_prompt("Select database")
            .items(&items)
            .default(0)
            .interact()?;
        if let Some(db) = databases.get(choice) {
            return Ok(db.clone());
        }
        let id: String = Input::new()
            .with_prompt("Database ID")
            .interact_text()?;
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        match notion.get_database(id).await {
            Ok(database) => return Ok(DatabaseSummary::from(database)),
            Err(err) => {
                debug!(error = %err, "manual database lookup failed");
                eprintln!(
                    "{} Could not access that database. Check the ID and make sure your integration has access.",
                    style("✗").red()
                );
            }
        }
    }
}

fn print_plan(plan: &MappingPlan) {
    println!("Mapping Pocket → Notion:\n");
    for mapped in &plan.existing {
        println!("   {}{:15} → {}", CHECK, mapped.field, mapped.column);
    }
    if !plan.to_create.is_empty() {
        println!();
        for planned in &plan.to_create {
            println!(
                "   {}{:15} → {} {}",
                PLUS,
                planned.field,
                planned.column,
                style("[will create]").dim()
            );
        }
    }
}

/// Keys typed at the prompt are lost unless stored. The daemon cannot prompt,
/// so offer to keep them in the (owner-only) config file.
fn offer_to_store_keys(
    config: &mut Config,
    pocket: &ResolvedKey,
    notion: &ResolvedKey,
    paths: &ConfigPaths,
) -> anyhow::Result<()> {
    if pocket.source != KeySource::Prompt && notion.source != KeySource::Prompt {
        return Ok(());
    }
    println!();
    let store = Confirm::new()
        .with_prompt(format!(
            "Save the entered API keys to {}? (readable only by you)",
            paths.config_file.display()
        ))
        .default(true)
        .interact()?;
    if store {
        if pocket.source == KeySource::Prompt {
            config.credentials.pocket_api_key = Some(pocket.value.clone());
        }
        if notion.source == KeySource::Prompt {
            config.credentials.notion_api_key = Some(notion.value.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerflow_core::{RateLimiter, RetryPolicy};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schema(columns: &[(&str, PropertyKind)]) -> HashMap<String, PropertyKind> {
        columns
            .iter()
            .map(|(name, kind)| (name.to_string(), *kind))
            .collect()
    }

    #[test]
    fn bare_database_gets_required_columns() {
        let plan = plan_property_mapping(&schema(&[("Name", PropertyKind::Title)]));

        assert_eq!(plan.property_map.title, "Name");
        assert_eq!(plan.property_map.dedup_key, "Inbox ID");
        assert_eq!(plan.property_map.priority, None);
        assert_eq!(plan.property_map.due_date, None);
        assert_eq!(plan.property_map.context.as_deref(), Some("Action Context"));
        assert_eq!(plan.property_map.source_url.as_deref(), Some("Source"));
        assert_eq!(plan.property_map.tags.as_deref(), Some("Tags"));
        assert_eq!(
            plan.required(),
            vec![
                ("Inbox ID".to_string(), PropertyKind::RichText),
                ("Action Context".to_string(), PropertyKind::RichText),
                ("Source".to_string(), PropertyKind::Url),
                ("Tags".to_string(), PropertyKind::MultiSelect),
            ]
        );
    }

    #[test]
    fn existing_columns_are_reused_by_name_and_type() {
        let plan = plan_property_mapping(&schema(&[
            ("Task", PropertyKind::Title),
            ("Priority", PropertyKind::Select),
            ("Due", PropertyKind::Date),
            ("Pocket ID", PropertyKind::RichText),
            ("Notes", PropertyKind::RichText),
            ("Link", PropertyKind::Url),
            ("Labels", PropertyKind::MultiSelect),
        ]));

        assert!(plan.to_create.is_empty());
        assert_eq!(plan.property_map.title, "Task");
        assert_eq!(plan.property_map.priority.as_deref(), Some("Priority"));
        assert_eq!(plan.property_map.due_date.as_deref(), Some("Due"));
        assert_eq!(plan.property_map.dedup_key, "Pocket ID");
        assert_eq!(plan.property_map.context.as_deref(), Some("Notes"));
        assert_eq!(plan.property_map.source_url.as_deref(), Some("Link"));
        assert_eq!(plan.property_map.tags.as_deref(), Some("Labels"));
        assert_eq!(plan.existing.len(), 7);
    }

    #[test]
    fn wrong_typed_columns_are_not_reused() {
        let plan = plan_property_mapping(&schema(&[
            ("Name", PropertyKind::Title),
            ("Priority", PropertyKind::RichText),
            ("Inbox ID", PropertyKind::Number),
            ("Source", PropertyKind::RichText),
        ]));

        assert_eq!(plan.property_map.priority, None);
        assert_eq!(plan.property_map.dedup_key, "Inbox ID (Power-Flow)");
        assert_eq!(plan.property_map.source_url.as_deref(), Some("Source (Power-Flow)"));
    }

    async fn failing_notion(status: u16) -> ApiError {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;
        NotionClient::with_base_url(&server.uri(), "secret_x", Arc::new(RateLimiter::new(1000.0)))
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(1))
            .test_connection()
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn auth_failures_are_explained() {
        let err = failing_notion(401).await;
        assert_eq!(
            describe_connection_error(ApiKeyKind::Notion, &err),
            "Invalid API key. Please check and try again."
        );

        let err = failing_notion(403).await;
        assert!(
            describe_connection_error(ApiKeyKind::Notion, &err).contains("integration settings")
        );
        assert!(describe_connection_error(ApiKeyKind::Pocket, &err).contains("'Read' access"));

        let err = failing_notion(400).await;
        assert!(describe_connection_error(ApiKeyKind::Notion, &err).starts_with("API error: "));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_problem() {
        let err = NotionClient::with_base_url(
            "http://127.0.0.1:1",
            "secret_x",
            Arc::new(RateLimiter::new(1000.0)),
        )
        .unwrap()
        .with_retry_policy(RetryPolicy::immediate(1))
        .test_connection()
        .await
        .unwrap_err();

        assert_eq!(
            describe_connection_error(ApiKeyKind::Notion, &err),
            "Can't connect to Notion API. Check your internet connection."
        );
    }
}
