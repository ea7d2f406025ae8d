//! CLI Tooling
//!
//! Command-line interface over the hierarchy, loader and filter layers.

use crate::config::{CanopyConfig, ConfigLoader};
use crate::error::ApiError;
use crate::filter::{SearchFilter, StructuralFilter, UserFilter};
use crate::hierarchy::{self, HierarchyPath};
use crate::logging::LoggingConfig;
use crate::source::InMemorySource;
use crate::view::TreeView;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Rounds of apply-then-refine while ancestor expansion improves
const MAX_REFINEMENTS: usize = 3;

/// Canopy CLI - progressive loading of large hierarchical record sets
#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Progressive, filtered browsing of large hierarchical record sets")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (where canopy.toml is looked up)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging config with command-line overrides applied.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hierarchy path algebra
    Path {
        #[command(subcommand)]
        command: PathCommands,
    },
    /// Load a JSON record file through the loader and print a viewport
    Browse {
        /// JSON array of records
        #[arg(long)]
        data: PathBuf,
        /// Visible range as START:END (end exclusive)
        #[arg(long, default_value = "0:20")]
        viewport: String,
        /// Free-text search over the configured search fields
        #[arg(long)]
        search: Option<String>,
        /// Attribute filter: field=value, field!=value, field>=value, field<=value, field~text, or field
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Restrict to the children of this node id
        #[arg(long)]
        children_of: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
pub enum PathCommands {
    /// Print the parent path
    Parent { path: String },
    /// Print the ancestor chain, root first
    Ancestors { path: String },
    /// Compare two paths in tree order
    Compare { a: String, b: String },
    /// Check whether PATH lies below ANCESTOR
    Descendant { path: String, ancestor: String },
}

/// One printed row of `browse`
#[derive(Debug, Serialize)]
struct BrowseRow {
    index: usize,
    id: String,
    path: Option<String>,
    depth: Option<u32>,
    label: String,
    /// "match", "ancestor" or empty
    role: &'static str,
}

/// CLI context holding the effective configuration
pub struct CliContext {
    workspace_root: PathBuf,
    config: CanopyConfig,
}

impl CliContext {
    /// Load configuration from `config_path`, or the standard sources for
    /// `workspace_root`.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Ok(Self {
            workspace_root,
            config,
        })
    }

    /// Context over an already-built configuration
    pub fn with_config(workspace_root: PathBuf, config: CanopyConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &CanopyConfig {
        &self.config
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Path { command } => execute_path(command),
            Commands::Browse {
                data,
                viewport,
                search,
                filters,
                children_of,
                format,
            } => {
                let viewport = parse_viewport(viewport)?;
                let request = BrowseRequest {
                    data: data.clone(),
                    viewport,
                    search: search.clone(),
                    filters: filters.clone(),
                    children_of: children_of.clone(),
                    json: parse_output_format(format)?,
                };
                self.browse(request).await
            }
            Commands::Config => self
                .config
                .to_toml()
                .map_err(|e| ApiError::Serialization(e.to_string())),
        }
    }

    async fn browse(&self, request: BrowseRequest) -> Result<String, ApiError> {
        let data = if request.data.is_absolute() {
            request.data.clone()
        } else {
            self.workspace_root.join(&request.data)
        };
        let source = Arc::new(InMemorySource::from_json_file(&data)?);
        let mut view = TreeView::new(self.config.clone(), source)?;

        if let Some(parent) = &request.children_of {
            view.set_structural_filter("children_of", StructuralFilter::ChildrenOf(parent.clone()));
        }
        if let Some(text) = &request.search {
            if !view.set_search_filter(SearchFilter::new(text.clone())) {
                info!(text = %text, "Search text below minimum length, ignored");
            }
        }
        for (i, raw) in request.filters.iter().enumerate() {
            let filter = UserFilter::parse(raw)
                .ok_or_else(|| ApiError::InvalidArgument(format!("Invalid filter '{}'", raw)))?;
            view.set_user_filter(format!("filter{}", i), filter);
        }

        let mut outcome = view.apply_filters().await?;
        for _ in 0..MAX_REFINEMENTS {
            if !view.needs_refresh() {
                break;
            }
            outcome = view.apply_filters().await?;
        }

        let (start, end) = request.viewport;
        view.update_viewport(start, end);
        let report = view.loader().flush().await;
        for (chunk_start, chunk_end, reason) in &report.failed {
            tracing::warn!(chunk_start, chunk_end, reason = %reason, "Chunk failed to load");
        }

        let (matches, ancestors) = view.match_sets();
        let matches: BTreeSet<String> = matches.into_iter().collect();
        let ancestors: BTreeSet<String> = ancestors.into_iter().collect();
        let rows: Vec<BrowseRow> = (start..end.min(outcome.total_items))
            .filter_map(|index| view.get_item(index).map(|record| (index, record)))
            .map(|(index, record)| BrowseRow {
                index,
                role: if matches.contains(&record.id) {
                    "match"
                } else if ancestors.contains(&record.id) {
                    "ancestor"
                } else {
                    ""
                },
                id: record.id.clone(),
                path: record.path.clone(),
                depth: record.depth,
                label: record.label(),
            })
            .collect();
        let metrics = view.metrics();
        let warnings = view.warnings();
        view.shutdown().await;

        if request.json {
            let body = json!({
                "total_items": outcome.total_items,
                "filter_source": outcome.filter.source,
                "expansion": outcome.filter.tier,
                "rows": rows,
                "metrics": metrics,
                "warnings": warnings,
            });
            return Ok(serde_json::to_string_pretty(&body)?);
        }

        let mut table = Table::new();
        table.load_preset(comfy_table::presets::UTF8_FULL);
        table.set_header(vec!["Index", "ID", "Path", "Depth", "Label", "Role"]);
        for row in &rows {
            table.add_row(vec![
                row.index.to_string(),
                row.id.clone(),
                row.path.clone().unwrap_or_else(|| "-".to_string()),
                row.depth.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                row.label.clone(),
                row.role.to_string(),
            ]);
        }

        let mut out = table.to_string();
        out.push_str(&format!(
            "\n{} of {} rows shown; filter {:?}, expansion {}; {} fetches, {} cache hits",
            rows.len(),
            outcome.total_items,
            outcome.filter.source,
            outcome
                .filter
                .tier
                .map(|t| format!("{:?}", t))
                .unwrap_or_else(|| "none".to_string()),
            metrics.fetches,
            metrics.cache_hits,
        ));
        for warning in warnings {
            out.push_str(&format!("\nwarning: {}", warning));
        }
        Ok(out)
    }
}

struct BrowseRequest {
    data: PathBuf,
    viewport: (usize, usize),
    search: Option<String>,
    filters: Vec<String>,
    children_of: Option<String>,
    json: bool,
}

fn execute_path(command: &PathCommands) -> Result<String, ApiError> {
    match command {
        PathCommands::Parent { path } => {
            let parsed = parse_path(path)?;
            Ok(parsed
                .parent()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(root)".to_string()))
        }
        PathCommands::Ancestors { path } => {
            parse_path(path)?;
            let chain = hierarchy::ancestor_chain(path);
            if chain.is_empty() {
                Ok("(none)".to_string())
            } else {
                Ok(chain.join("\n"))
            }
        }
        PathCommands::Compare { a, b } => {
            let symbol = match hierarchy::compare_paths(a, b) {
                Ordering::Less => "<",
                Ordering::Equal => "=",
                Ordering::Greater => ">",
            };
            Ok(format!("{} {} {}", a, symbol, b))
        }
        PathCommands::Descendant { path, ancestor } => {
            Ok(hierarchy::is_descendant_of(path, ancestor).to_string())
        }
    }
}

fn parse_path(raw: &str) -> Result<HierarchyPath, ApiError> {
    HierarchyPath::parse(raw)
        .map_err(|e| ApiError::InvalidArgument(format!("Invalid path '{}': {}", raw, e)))
}

/// Parse `START:END` into a half-open range.
fn parse_viewport(raw: &str) -> Result<(usize, usize), ApiError> {
    let invalid = || ApiError::InvalidArgument(format!("Invalid viewport '{}', expected START:END", raw));
    let (start, end) = raw.split_once(':').ok_or_else(invalid)?;
    let start: usize = start.trim().parse().map_err(|_| invalid())?;
    let end: usize = end.trim().parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

fn parse_output_format(format: &str) -> Result<bool, ApiError> {
    match format {
        "text" => Ok(false),
        "json" => Ok(true),
        other => Err(ApiError::InvalidArgument(format!(
            "Invalid format '{}' (must be 'text' or 'json')",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> CliContext {
        CliContext::with_config(dir.path().to_path_buf(), CanopyConfig::default())
    }

    fn write_records(dir: &TempDir) {
        let records = json!([
            {"id": "r", "path": "1.", "depth": 0, "attributes": {"name": "Plant", "status": "closed"}},
            {"id": "a", "parent_id": "r", "path": "1.1.", "depth": 1, "attributes": {"name": "Pump A", "status": "open"}},
            {"id": "b", "parent_id": "r", "path": "1.2.", "depth": 1, "attributes": {"name": "Valve B", "status": "closed"}},
            {"id": "s", "path": "2.", "depth": 0, "attributes": {"name": "Store", "status": "closed"}}
        ]);
        fs::write(dir.path().join("records.json"), records.to_string()).unwrap();
    }

    #[test]
    fn test_parse_viewport() {
        assert_eq!(parse_viewport("10:30").unwrap(), (10, 30));
        assert_eq!(parse_viewport(" 0 : 5 ").unwrap(), (0, 5));
        assert!(parse_viewport("30:10").is_err());
        assert!(parse_viewport("10").is_err());
        assert!(parse_viewport("a:b").is_err());
    }

    #[test]
    fn test_path_commands() {
        let parent = execute_path(&PathCommands::Parent {
            path: "1.3.".to_string(),
        })
        .unwrap();
        assert_eq!(parent, "1.");

        let ancestors = execute_path(&PathCommands::Ancestors {
            path: "1.2.3.".to_string(),
        })
        .unwrap();
        assert_eq!(ancestors, "1.\n1.2.");

        let compare = execute_path(&PathCommands::Compare {
            a: "1.10.".to_string(),
            b: "1.9.".to_string(),
        })
        .unwrap();
        assert_eq!(compare, "1.10. > 1.9.");

        let below = execute_path(&PathCommands::Descendant {
            path: "1.2.".to_string(),
            ancestor: "1.".to_string(),
        })
        .unwrap();
        assert_eq!(below, "true");

        assert!(matches!(
            execute_path(&PathCommands::Parent {
                path: "1.x.".to_string()
            }),
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_browse_with_user_filter_marks_matches_and_ancestors() {
        let dir = TempDir::new().unwrap();
        write_records(&dir);
        let output = context(&dir)
            .execute(&Commands::Browse {
                data: PathBuf::from("records.json"),
                viewport: "0:10".to_string(),
                search: None,
                filters: vec!["status=open".to_string()],
                children_of: None,
                format: "json".to_string(),
            })
            .await
            .unwrap();

        let body: serde_json::Value = serde_json::from_str(&output).unwrap();
        let rows = body["rows"].as_array().unwrap();
        let roles: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r["id"].as_str().unwrap(), r["role"].as_str().unwrap()))
            .collect();
        assert_eq!(roles, vec![("r", "ancestor"), ("a", "match")]);
        assert_eq!(body["expansion"], "path_prefixes");
    }

    #[tokio::test]
    async fn test_browse_text_table() {
        let dir = TempDir::new().unwrap();
        write_records(&dir);
        let output = context(&dir)
            .execute(&Commands::Browse {
                data: PathBuf::from("records.json"),
                viewport: "0:2".to_string(),
                search: None,
                filters: Vec::new(),
                children_of: Some("r".to_string()),
                format: "text".to_string(),
            })
            .await
            .unwrap();
        assert!(output.contains("Pump A"));
        assert!(output.contains("Valve B"));
        assert!(!output.contains("Store"));
        assert!(output.contains("2 of 2 rows shown"));
    }

    #[tokio::test]
    async fn test_browse_rejects_bad_filter() {
        let dir = TempDir::new().unwrap();
        write_records(&dir);
        let result = context(&dir)
            .execute(&Commands::Browse {
                data: PathBuf::from("records.json"),
                viewport: "0:2".to_string(),
                search: None,
                filters: vec!["=oops".to_string()],
                children_of: None,
                format: "text".to_string(),
            })
            .await;
        assert!(matches!(result, Err(ApiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_config_command_prints_toml() {
        let dir = TempDir::new().unwrap();
        let output = context(&dir).execute(&Commands::Config).await.unwrap();
        assert!(output.contains("[loader]"));
        assert!(output.contains("chunk_size = 50"));
    }

    #[test]
    fn test_logging_overrides() {
        let cli = Cli::parse_from(["canopy", "--log-level", "debug", "config"]);
        let config = cli.logging_config(&LoggingConfig::default());
        assert_eq!(config.level, "debug");
        assert_eq!(config.output, "stderr");
    }
}
