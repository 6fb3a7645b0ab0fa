/*!
 * Relay CLI Style System
 *
 * Tables and themed messages for the `relay` binary.
 */

use crate::config::RelayConfig;
use crate::registry::RegistrySnapshot;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", Theme::success("✓"), message);
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", Theme::warning("!"), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", Theme::error("✗"), message);
}

pub fn section_header(title: &str) {
    println!();
    println!("{}", Theme::header(title));
}

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Create a minimal table (no outer borders)
pub fn create_minimal_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_NO_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Key-value table of the engine tunables
pub fn settings_table(config: &RelayConfig) -> Table {
    let cb = &config.circuit_breaker;
    let items = [
        (
            "Circuit breaker",
            format!(
                "{} consecutive / {:.0}% of {}+ calls, recovery {}s, {} trial success(es)",
                cb.failure_threshold,
                cb.failure_rate_threshold * 100.0,
                cb.minimum_calls,
                cb.recovery_timeout_secs,
                cb.success_threshold
            ),
        ),
        (
            "Health",
            format!(
                "ttl {}s, probe timeout {}ms",
                config.health.ttl_secs, config.health.probe_timeout_ms
            ),
        ),
        (
            "Pool",
            format!(
                "{} per provider, acquire {}ms, call timeout {}ms",
                config.pool.max_size, config.pool.acquire_timeout_ms, config.pool.request_timeout_ms
            ),
        ),
        (
            "Retry",
            format!(
                "{} attempt(s), {:?} from {}ms up to {}ms",
                config.retry.max_attempts,
                config.retry.backoff,
                config.retry.initial_delay_ms,
                config.retry.max_delay_ms
            ),
        ),
        (
            "Cache",
            if config.cache.enabled {
                format!(
                    "ttl {}s, {} override(s), {} max entries",
                    config.cache.default_ttl_secs,
                    config.cache.ttl_overrides.len(),
                    config.cache.max_entries
                )
            } else {
                "disabled".to_string()
            },
        ),
        (
            "Deadline",
            config
                .orchestrator
                .deadline_ms
                .map_or_else(|| "none".to_string(), |ms| format!("{}ms", ms)),
        ),
    ];

    let mut table = create_minimal_table();
    for (key, value) in items {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan),
            Cell::new(value).add_attribute(Attribute::Bold),
        ]);
    }
    table
}

/// Fallback chain per operation, in the order providers are tried
pub fn chain_table(snapshot: &RegistrySnapshot) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Operation"),
        header_cell("#"),
        header_cell("Provider"),
        header_cell("Kind"),
        header_cell("Priority"),
        header_cell("Health check"),
    ]);

    for operation in snapshot.operations() {
        for (position, entry) in snapshot.ordered(&operation).iter().enumerate() {
            let descriptor = entry.descriptor();
            table.add_row(vec![
                Cell::new(&operation),
                Cell::new(position + 1),
                Cell::new(&descriptor.name).add_attribute(Attribute::Bold),
                Cell::new(&descriptor.kind),
                Cell::new(descriptor.priority),
                if descriptor.health_check {
                    Cell::new("yes").fg(Color::Green)
                } else {
                    Cell::new("no").fg(Color::DarkGrey)
                },
            ]);
        }
    }

    for descriptor in snapshot.descriptors().iter().filter(|d| !d.enabled) {
        table.add_row(vec![
            Cell::new(&descriptor.operation).fg(Color::DarkGrey),
            Cell::new("-").fg(Color::DarkGrey),
            Cell::new(format!("{} (disabled)", descriptor.name)).fg(Color::DarkGrey),
            Cell::new(&descriptor.kind).fg(Color::DarkGrey),
            Cell::new(descriptor.priority).fg(Color::DarkGrey),
            Cell::new("-").fg(Color::DarkGrey),
        ]);
    }

    table
}
