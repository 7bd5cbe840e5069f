use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use unicode_width::UnicodeWidthStr;

use rowsql::browse::{self, RowStripe};
use rowsql::db::connection::{self, Profiles};
use rowsql::db::driver::ResultSet;
use rowsql::export;
use rowsql::links;
use rowsql::sql::{BrowseSpec, ColumnSpec, Filter, OrderSpec, PageSpec, QueryContext};

/// Browse, filter and export relational table data over saved connections
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Saved connection profile to use
    #[arg(long = "connect")]
    connect: String,

    /// Table to browse
    #[arg(long)]
    table: String,

    /// Filter condition, repeatable; an empty COL searches all columns
    #[arg(long = "where", value_name = "COL:OP:VALUE")]
    filters: Vec<String>,

    /// Column matched as IS NULL, repeatable
    #[arg(long = "null", value_name = "COL")]
    null_cols: Vec<String>,

    /// Output column, repeatable; FUN wraps the column, * selects everything
    #[arg(long = "col", value_name = "[FUN:]COL")]
    columns: Vec<String>,

    /// Sort column, repeatable; prefix with - for descending
    #[arg(long = "order", value_name = "[-]COL")]
    orders: Vec<String>,

    /// Rows per page; 0 disables the limit
    #[arg(long, default_value_t = 50)]
    limit: u64,

    /// Zero-based page number
    #[arg(long, default_value_t = 0)]
    page: u64,

    /// Print CSV instead of a table
    #[arg(long)]
    csv: bool,

    /// Print re-importable INSERT statements instead of a table
    #[arg(long)]
    dump: bool,

    /// Print navigation links resolved for the first row
    #[arg(long)]
    links: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let profiles = Profiles::load()?;
    let mut profile = match profiles.find(&cli.connect) {
        Some(profile) => profile.clone(),
        None => {
            eprintln!("Error: no saved connection named {:?}", cli.connect);
            eprintln!("Saved connections:");
            for profile in &profiles.connections {
                eprintln!("  - {}", profile.name);
            }
            std::process::exit(1);
        }
    };

    // Resolve password: ROWSQL_PASSWORD env var, then interactive prompt
    if profile.password.is_empty() {
        if let Ok(password) = std::env::var("ROWSQL_PASSWORD") {
            profile.password = password;
        } else {
            let prompt = format!("Password for {}: ", profile.display_string());
            profile.password = rpassword::read_password_from_tty(Some(&prompt))?;
        }
    }

    let spec = browse_spec(&cli)?;

    let mut driver = connection::connect(&profile)
        .await
        .with_context(|| format!("failed to connect to {}", profile.display_string()))?;

    let mut ctx = QueryContext::new(profile.backend.dialect());
    ctx.database = (!profile.database.is_empty()).then(|| profile.database.clone());
    ctx.schema = profile.schema.clone();

    let browsed = browse::select(
        driver.as_mut(),
        &profile,
        &profiles.engine,
        &ctx,
        &cli.table,
        &spec,
    )
    .await?;

    if cli.csv {
        print!("{}", export::to_csv(&browsed.result));
    } else if cli.dump {
        print!("{}", export::to_sql_insert(&ctx, &browsed.result, &cli.table));
    } else {
        render_table(&browsed.result);
        let footer = match spec.page.limit {
            Some(limit) if limit > 0 => format!(
                "{} rows of {} (page {} of {})",
                browsed.result.row_count(),
                browsed.count,
                cli.page,
                browsed.count.last_page(limit)
            ),
            _ => format!("{} rows of {}", browsed.result.row_count(), browsed.count),
        };
        println!("{}", footer);
    }

    if cli.links {
        print_links(&ctx, &cli.table, &spec, &browsed)?;
    }

    Ok(())
}

fn browse_spec(cli: &Cli) -> Result<BrowseSpec> {
    let mut spec = BrowseSpec::default();
    for raw in &cli.filters {
        spec.filters.push(parse_filter(raw)?);
    }
    spec.null_cols = cli.null_cols.clone();
    spec.columns = cli.columns.iter().map(|raw| parse_column(raw)).collect();
    spec.orders = cli.orders.iter().map(|raw| parse_order(raw)).collect();
    spec.page = if cli.limit == 0 {
        PageSpec {
            limit: None,
            page: cli.page,
        }
    } else {
        PageSpec::new(cli.limit, cli.page)
    };
    Ok(spec)
}

fn parse_filter(raw: &str) -> Result<Filter> {
    let mut parts = raw.splitn(3, ':');
    let col = parts.next().unwrap_or("");
    let op = parts
        .next()
        .with_context(|| format!("filter {:?} is not COL:OP:VALUE", raw))?;
    let val = parts.next().unwrap_or("");
    Filter::new(col, op, val)
        .with_context(|| format!("unsupported operator {:?} in filter {:?}", op, raw))
}

fn parse_column(raw: &str) -> ColumnSpec {
    let (fun, col) = match raw.split_once(':') {
        Some((fun, col)) => (fun.to_string(), col.to_string()),
        None => (String::new(), raw.to_string()),
    };
    ColumnSpec {
        col: if col == "*" { String::new() } else { col },
        fun,
        alias: None,
    }
}

fn parse_order(raw: &str) -> OrderSpec {
    match raw.strip_prefix('-') {
        Some(col) => OrderSpec::desc(col),
        None => OrderSpec::asc(raw),
    }
}

fn render_table(result: &ResultSet) {
    if result.columns.is_empty() {
        return;
    }
    let mut widths: Vec<usize> = result
        .columns
        .iter()
        .map(|col| UnicodeWidthStr::width(col.name.as_str()))
        .collect();
    for row in &result.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.display_width());
            }
        }
    }

    let header: Vec<String> = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(col, width)| pad(&col.name, *width))
        .collect();
    println!("{}", header.join(" | "));
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    println!("{}", rule.join("-+-"));

    let dim = std::io::stdout().is_terminal();
    let mut stripe = RowStripe::default();
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| pad(&cell.display(), *width))
            .collect();
        let line = cells.join(" | ");
        if dim && stripe.next() {
            println!("\x1b[2m{}\x1b[0m", line);
        } else {
            println!("{}", line);
        }
    }
}

/// Pad to terminal cell width; `format!` width counts chars, which is wrong
/// for wide glyphs.
fn pad(text: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(text);
    let mut out = String::from(text);
    for _ in used..width {
        out.push(' ');
    }
    out
}

fn print_links(
    ctx: &QueryContext,
    table: &str,
    spec: &BrowseSpec,
    browsed: &browse::BrowseResult,
) -> Result<()> {
    let row = match browsed.result.fetch_assoc(0) {
        Some(row) => row,
        None => return Ok(()),
    };
    println!();
    let identity = links::row_identity(ctx, &row, &browsed.indexes);
    if !identity.is_empty() {
        let parts: Vec<String> = identity
            .iter()
            .map(|(name, value)| format!("{} = {}", name, value.display()))
            .collect();
        println!("row identity: {}", parts.join(", "));
    }
    for (name, _) in &row {
        if let Some(link) = links::foreign_key_link(name, &row, &browsed.foreign_keys) {
            println!("{} -> {}", name, serde_json::to_string(&link)?);
        } else if browsed.is_group && links::is_count_column(name) {
            let link = links::count_link(table, &spec.filters, &identity);
            println!("{} -> {}", name, serde_json::to_string(&link)?);
        }
    }
    Ok(())
}
