use std::env;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracking_search::{
    compile_search, parse_filter, ConfigError, Dialect, SearchConfig, SearchContext, SearchDriver,
    SearchRunsRequest, SqliteRunStore,
};

const DEFAULT_CONFIG_PATH: &str = "search_config.json";

const HELP: &str = "\
<filter>              print the validated filter and the compiled SQL
:search <filter>      run the filter against the tracking store
:next                 fetch the next page of the last search
:dialect <name>       render for postgres, mysql, sqlserver or sqlite
:experiments <ids>    comma separated experiment ids (default 0)
:order <clauses>      order_by clauses separated by ';' (empty clears)
:max <n>              max_results per page
:help                 show this help
:quit                 exit";

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn load_config(path: &str) -> Result<SearchConfig> {
    match SearchConfig::from_json_file(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::Missing(_)) => Ok(SearchConfig::default()),
        Err(e) => Err(e).context("failed to load search config"),
    }
}

struct Session {
    config: SearchConfig,
    dialect: Dialect,
    request: SearchRunsRequest,
    driver: Option<SearchDriver<SqliteRunStore>>,
}

impl Session {
    fn new(config: SearchConfig) -> Self {
        Self {
            dialect: config.dialect,
            request: SearchRunsRequest {
                experiment_ids: vec!["0".to_string()],
                ..Default::default()
            },
            config,
            driver: None,
        }
    }

    fn context(&self) -> SearchContext {
        match self.config.statement_timeout() {
            Some(timeout) => SearchContext::new().with_timeout(timeout),
            None => SearchContext::new(),
        }
    }

    fn driver(&mut self) -> Result<&SearchDriver<SqliteRunStore>> {
        if self.driver.is_none() {
            let store =
                SqliteRunStore::open(&self.config.tracking_store_uri, self.config.pool_size)
                    .context("failed to open tracking store")?;
            self.driver = Some(
                SearchDriver::new(store).with_default_max_results(self.config.default_max_results),
            );
        }
        self.driver
            .as_ref()
            .context("tracking store is not open")
    }

    fn explain(&self, filter: &str) -> Result<()> {
        let clauses = parse_filter(filter)?;
        for clause in &clauses {
            println!("  {}", clause);
        }

        let request = SearchRunsRequest {
            filter: filter.to_string(),
            ..self.request.clone()
        };
        let compiled = compile_search(&request, self.dialect, self.config.default_max_results)?;
        let (sql, values) = compiled.to_sql();
        println!("\n[{}]\n{}", self.dialect, sql);
        for (i, value) in values.0.iter().enumerate() {
            println!("  ${} = {:?}", i + 1, value);
        }
        Ok(())
    }

    fn search(&mut self, filter: Option<&str>) -> Result<()> {
        match filter {
            Some(filter) => {
                self.request.filter = filter.to_string();
                self.request.page_token.clear();
            }
            None if self.request.page_token.is_empty() => {
                println!("no further pages");
                return Ok(());
            }
            None => {}
        }

        let ctx = self.context();
        let request = self.request.clone();
        let response = self.driver()?.search_runs(&ctx, &request)?;

        println!("{}", serde_json::to_string_pretty(&response)?);
        println!("{} run(s)", response.runs.len());
        self.request.page_token = response.next_page_token;
        Ok(())
    }

    /// Returns false when the session should end.
    fn handle(&mut self, line: &str) -> Result<bool> {
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            ":quit" | ":q" => return Ok(false),
            ":help" => println!("{}", HELP),
            ":search" => self.search(Some(rest))?,
            ":next" => self.search(None)?,
            ":dialect" => {
                self.dialect = rest.parse()?;
                println!("dialect: {}", self.dialect);
            }
            ":experiments" => {
                self.request.experiment_ids =
                    rest.split(',').map(|id| id.trim().to_string()).collect();
                self.request.validate()?;
            }
            ":order" => {
                self.request.order_by = rest
                    .split(';')
                    .map(str::trim)
                    .filter(|clause| !clause.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            ":max" => {
                let max_results = rest.parse::<i32>().context("max_results must be an integer")?;
                self.request.max_results = Some(max_results);
                self.request.validate()?;
            }
            _ => self.explain(line)?,
        }
        Ok(true)
    }
}

fn main() -> Result<()> {
    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path)?;
    init_logging(&config.log_level);
    info!(
        config = %config_path,
        dialect = %config.dialect,
        store = %config.tracking_store_uri,
        "starting run search repl"
    );

    println!("--- tracking_search: filter to SQL ---");
    println!("{}\n", HELP);

    let mut editor = DefaultEditor::new()?;
    let mut session = Session::new(config);

    loop {
        match editor.readline("search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match session.handle(line) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!(error = %e, "command failed");
                        println!("error: {:#}", e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    info!("run search repl finished");
    Ok(())
}
