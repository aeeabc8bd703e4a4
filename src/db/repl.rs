//! Interactive REPL (Read-Eval-Print Loop) for PrismDB.
//!
//! One command per line, arguments separated by spaces. Double quotes group
//! an argument that contains spaces, and `\"` / `\\` escape inside quotes.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use thiserror::Error;

use super::api::Database;
use super::error::DatabaseError;
use crate::storage::{Backend, GitBackend};

/// Command-line parse errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("unknown command '{0}', type help for the list")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid key size '{0}'")]
    InvalidKeySize(String),
}

/// REPL errors.
#[derive(Debug, Error)]
pub enum ReplError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Every command the interpreter understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { name: String, key_size: Option<usize> },
    Save,
    Use { name: String },
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
    Sync,
    Unsync,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(line)?;
        let (head, args) = tokens.split_first().ok_or(ParseError::Empty)?;

        let command = match (head.to_lowercase().as_str(), args) {
            ("create", [name]) => Command::Create {
                name: name.clone(),
                key_size: None,
            },
            ("create", [name, size]) => Command::Create {
                name: name.clone(),
                key_size: Some(size.parse().map_err(|_| ParseError::InvalidKeySize(size.clone()))?),
            },
            ("create", _) => return Err(ParseError::Usage("create <name> [key-size]")),
            ("use", [name]) => Command::Use { name: name.clone() },
            ("use", _) => return Err(ParseError::Usage("use <name>")),
            ("set", [key, value @ ..]) if !value.is_empty() => Command::Set {
                key: key.clone(),
                value: value.join(" "),
            },
            ("set", _) => return Err(ParseError::Usage("set <key> <value>")),
            ("get", [key]) => Command::Get { key: key.clone() },
            ("get", _) => return Err(ParseError::Usage("get <key>")),
            ("del", [key]) => Command::Del { key: key.clone() },
            ("del", _) => return Err(ParseError::Usage("del <key>")),
            ("save", []) => Command::Save,
            ("sync", []) => Command::Sync,
            ("unsync", []) => Command::Unsync,
            ("status", []) => Command::Status,
            ("help" | "?", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            ("save" | "sync" | "unsync" | "status", _) => return Err(ParseError::Usage("command takes no arguments")),
            (other, _) => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(ParseError::UnterminatedQuote),
                        },
                        Some(other) => current.push(other),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// What the loop does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Print(String),
    Quit,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Print(text) => write!(f, "{}", text),
            Outcome::Quit => Ok(()),
        }
    }
}

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "prismdb> ".into(),
            timing: false,
        }
    }
}

/// The interactive REPL.
pub struct Repl<B: Backend = GitBackend> {
    db: Database<B>,
    config: ReplConfig,
}

impl<B: Backend> Repl<B> {
    /// Create a new REPL with the given database.
    pub fn new(db: Database<B>) -> Self {
        Self::with_config(db, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(db: Database<B>, config: ReplConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Database<B> {
        &self.db
    }

    /// Run the REPL interactively until `quit` or end of input.
    pub fn run(&mut self) -> Result<(), ReplError> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}", self.config.prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                println!();
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            let start = Instant::now();
            match self.run_line(&line) {
                Ok(Outcome::Quit) => break,
                Ok(outcome) => {
                    println!("{}", outcome);
                    if self.config.timing {
                        println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);
                    }
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }

        self.db.stop_sync();
        Ok(())
    }

    /// Parse and execute a single line.
    pub fn run_line(&mut self, line: &str) -> Result<Outcome, ReplError> {
        let command = Command::parse(line)?;
        Ok(self.execute(command)?)
    }

    /// Execute a parsed command.
    pub fn execute(&mut self, command: Command) -> Result<Outcome, DatabaseError> {
        let message = match command {
            Command::Create { name, key_size } => {
                let bits = key_size.unwrap_or(self.db.config().key_size);
                let head = self.db.create(&name, bits)?;
                format!("created {} at {}", name, head)
            }
            Command::Use { name } => {
                let head = self.db.use_database(&name)?;
                format!("using {} at {}", name, head)
            }
            Command::Save => {
                let record = self.db.save()?;
                format!("published {} -> {}", record.name, record.value)
            }
            Command::Set { key, value } => {
                let head = self.db.set(&key, value.as_bytes())?;
                format!("head {}", head)
            }
            Command::Get { key } => {
                let entry = self.db.get(&key)?;
                let written = entry
                    .timestamp()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| String::from_utf8_lossy(&entry.metadata).into_owned());
                format!("{}  ({})", String::from_utf8_lossy(&entry.payload), written)
            }
            Command::Del { key } => {
                let head = self.db.del(&key)?;
                format!("head {}", head)
            }
            Command::Sync => {
                self.db.start_sync()?;
                "replication on".to_string()
            }
            Command::Unsync => match self.db.stop_sync() {
                Some(stats) => format!(
                    "replication off ({} applied, {} dropped, {} failed)",
                    stats.applied, stats.dropped, stats.failed
                ),
                None => "replication was not running".to_string(),
            },
            Command::Status => self.status(),
            Command::Help => help_text().to_string(),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Print(message))
    }

    fn status(&self) -> String {
        let Some(name) = self.db.name() else {
            return "no database in use".to_string();
        };
        let head = self.db.head().map(|h| h.to_string()).unwrap_or_default();
        let peer = self
            .db
            .peer_identity()
            .unwrap_or_else(|e| format!("unavailable ({})", e));
        format!(
            "database: {}\nhead:     {}\npeer:     {}\nsyncing:  {}",
            name,
            head,
            peer,
            if self.db.is_syncing() { "yes" } else { "no" }
        )
    }

    fn print_banner(&self) {
        println!("PrismDB v{}", env!("CARGO_PKG_VERSION"));
        println!("Encrypted versioned key-value store. Type help for commands.");
        println!();
    }
}

fn help_text() -> &'static str {
    "Commands:
  create <name> [key-size]   Create a database with a new keypair
  use <name>                 Open the last published head of a database
  set <key> <value>          Store a value
  get <key>                  Read a value and its write time
  del <key>                  Remove a key
  save                       Publish the current head
  sync                       Start replicating with other holders
  unsync                     Stop replicating
  status                     Show the open database
  help                       Show this help message
  quit                       Exit"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseConfig;
    use crate::storage::MemoryBackend;

    fn repl() -> Repl<MemoryBackend> {
        let config = DatabaseConfig::default().ephemeral_keys(true).key_size(1024);
        Repl::new(Database::in_memory(config).unwrap())
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("set  color blue ").unwrap(), vec!["set", "color", "blue"]);
        assert_eq!(tokenize(r#"set "my key" "a \"b\"""#).unwrap(), vec!["set", "my key", r#"a "b""#]);
        assert_eq!(tokenize(r#"set k """#).unwrap(), vec!["set", "k", ""]);
        assert_eq!(tokenize(r#"set k "open"#), Err(ParseError::UnterminatedQuote));
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("create dbname").unwrap(),
            Command::Create {
                name: "dbname".into(),
                key_size: None
            }
        );
        assert_eq!(
            Command::parse("CREATE dbname 4096").unwrap(),
            Command::Create {
                name: "dbname".into(),
                key_size: Some(4096)
            }
        );
        assert_eq!(
            Command::parse("set greeting hello world").unwrap(),
            Command::Set {
                key: "greeting".into(),
                value: "hello world".into()
            }
        );
        assert_eq!(Command::parse("get color").unwrap(), Command::Get { key: "color".into() });
        assert_eq!(Command::parse("sync").unwrap(), Command::Sync);
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Command::parse(""), Err(ParseError::Empty));
        assert_eq!(Command::parse("frobnicate"), Err(ParseError::Unknown("frobnicate".into())));
        assert!(matches!(Command::parse("set color"), Err(ParseError::Usage(_))));
        assert!(matches!(Command::parse("get"), Err(ParseError::Usage(_))));
        assert!(matches!(Command::parse("save now"), Err(ParseError::Usage(_))));
        assert_eq!(
            Command::parse("create db big"),
            Err(ParseError::InvalidKeySize("big".into()))
        );
    }

    #[test]
    fn test_session() {
        let mut repl = repl();

        assert!(matches!(repl.run_line("get color"), Err(ReplError::Database(DatabaseError::NotOpen))));

        let created = repl.run_line("create dbname 1024").unwrap().to_string();
        assert!(created.starts_with("created dbname at "));

        repl.run_line(r#"set color "deep blue""#).unwrap();
        let got = repl.run_line("get color").unwrap().to_string();
        assert!(got.starts_with("deep blue  ("));

        repl.run_line("del color").unwrap();
        assert!(matches!(
            repl.run_line("get color"),
            Err(ReplError::Database(DatabaseError::KeyNotFound(_)))
        ));

        let status = repl.run_line("status").unwrap().to_string();
        assert!(status.contains("database: dbname"));
        assert!(status.contains("syncing:  no"));

        repl.run_line("sync").unwrap();
        assert!(repl.database().is_syncing());
        assert!(repl.run_line("unsync").unwrap().to_string().starts_with("replication off"));

        assert_eq!(repl.run_line("quit").unwrap(), Outcome::Quit);
    }

    #[test]
    fn test_errors_do_not_end_session() {
        let mut repl = repl();
        assert!(matches!(repl.run_line("bogus"), Err(ReplError::Parse(_))));
        assert!(repl.run_line("create dbname").is_ok());
        assert!(repl.database().is_open());
    }
}
