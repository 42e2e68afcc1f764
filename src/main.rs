use std::io::{self, BufRead, Write};

use tracing::{error, info};

use metastore::datatype::Scalar;
use metastore::parser;
use metastore::store::Store;

#[derive(Debug, serde::Deserialize)]
struct Settings {
    #[serde(default = "default_database")]
    database: String,
}

fn default_database() -> String {
    "metastore.db".to_owned()
}

/// Settings come from metastore.toml when present, overridable with
/// METASTORE_-prefixed environment variables.
fn settings() -> Settings {
    config::Config::builder()
        .add_source(config::File::with_name("metastore").required(false))
        .add_source(config::Environment::with_prefix("METASTORE"))
        .build()
        .and_then(config::Config::try_deserialize)
        .unwrap_or_else(|_| Settings {
            database: default_database(),
        })
}

fn prompt(line: &str) -> io::Result<String> {
    print!("{}", line);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(input.trim().to_owned())
}

fn run_query(store: &Store, sql: &str) {
    let mut select = match parser::parse(sql) {
        Ok(select) => select,
        Err(e) => {
            error!(%e, "could not parse query");
            return;
        }
    };
    let params: Vec<String> = select
        .where_groups
        .iter()
        .flat_map(|g| g.criteria.iter().map(|c| c.param_name.clone()))
        .collect();
    for param in params {
        let Ok(input) = prompt(&format!("{} = ", param)) else {
            return;
        };
        let value = match input.parse::<f64>() {
            Ok(n) => Scalar::Number(n),
            Err(_) => Scalar::Text(input),
        };
        select.add_param(param, value);
    }
    match store.select(&select) {
        Ok(rows) => {
            println!("{}", select.select.join("\t"));
            for row in rows {
                let rendered: Vec<String> = row
                    .iter()
                    .map(|v| match v {
                        Some(scalar) => scalar.to_string(),
                        None => "null".to_owned(),
                    })
                    .collect();
                println!("{}", rendered.join("\t"));
            }
        }
        Err(e) => error!(%e, "query failed"),
    }
}

fn print_schema(store: &Store) {
    match store.schema(None) {
        Ok(schema) => {
            for (table, columns) in schema {
                println!("{}: {}", table, columns.join(", "));
            }
        }
        Err(e) => error!(%e, "could not list the schema"),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = settings().database;
    let store = match Store::open(&path) {
        Ok(store) => store,
        Err(e) => {
            error!(%e, %path, "could not open the store");
            return;
        }
    };
    info!(%path, "store opened");

    println!("Commands: a SELECT query, 'schema', or 'quit'.");
    loop {
        let Ok(line) = prompt("> ") else { break };
        match line.as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "schema" => print_schema(&store),
            _ => run_query(&store, &line),
        }
    }
}
