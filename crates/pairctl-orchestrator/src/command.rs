//! Administrative commands sent to database nodes.
//!
//! Every interaction with a node is one [`AdminCommand`]. Real backends
//! render a command to a `mysql` or `mysqldump` invocation; the simulated
//! backend interprets the variant directly.

use std::fmt;

use pairctl_core::{Node, PositionToken};

/// Client program a command runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Client {
    /// The `mysql` command-line client.
    Mysql,
    /// The `mysqldump` export tool.
    Mysqldump,
}

impl Client {
    /// Returns the program name.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Mysqldump => "mysqldump",
        }
    }
}

/// One administrative command.
#[derive(Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Check that the node accepts connections.
    Ping,

    /// Create a user that may connect from any host.
    CreateUser {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },

    /// Drop a user if it exists.
    DropUser {
        /// User name.
        user: String,
    },

    /// Print `1` if the user exists.
    UserExists {
        /// User name.
        user: String,
    },

    /// Grant replication privileges to a user.
    GrantReplication {
        /// User name.
        user: String,
    },

    /// List databases, one per line.
    ShowDatabases,

    /// Create a database if it is missing.
    CreateDatabase {
        /// Database name.
        name: String,
    },

    /// Drop a database if it exists.
    DropDatabase {
        /// Database name.
        name: String,
    },

    /// Export databases together with the executed GTID set.
    Dump {
        /// Databases to export.
        databases: Vec<String>,
    },

    /// Load a dump produced by [`AdminCommand::Dump`].
    Restore {
        /// The dump.
        payload: Vec<u8>,
    },

    /// Load a plain SQL dump into one database.
    Import {
        /// Target database.
        database: String,
        /// The dump.
        payload: Vec<u8>,
    },

    /// Clear the binary log and executed GTID set before a restore.
    ResetBinaryLogs,

    /// Declare a GTID set as already executed; the set must be empty.
    SetPurgedPosition {
        /// GTID set.
        position: String,
    },

    /// Point the node at a replication source using GTID auto-positioning.
    ChangeSource {
        /// Source host as reachable from the replica.
        host: String,
        /// Source port.
        port: u16,
        /// Replication user.
        user: String,
        /// Replication password.
        password: String,
    },

    /// Start the replication threads.
    StartReplica,

    /// Stop the replication threads.
    StopReplica,

    /// Forget the replication source and relay logs.
    ResetReplicaAll,

    /// Print replication status in vertical format.
    ShowReplicaStatus,

    /// Print the executed GTID set.
    ExecutedPosition,

    /// Run arbitrary SQL.
    Sql(String),
}

impl AdminCommand {
    /// Returns the kebab-case name of this command, used in logs, errors
    /// and by fault injection.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::CreateUser { .. } => "create-user",
            Self::DropUser { .. } => "drop-user",
            Self::UserExists { .. } => "user-exists",
            Self::GrantReplication { .. } => "grant-replication",
            Self::ShowDatabases => "show-databases",
            Self::CreateDatabase { .. } => "create-database",
            Self::DropDatabase { .. } => "drop-database",
            Self::Dump { .. } => "dump",
            Self::Restore { .. } => "restore",
            Self::Import { .. } => "import",
            Self::ResetBinaryLogs => "reset-binary-logs",
            Self::SetPurgedPosition { .. } => "set-purged-position",
            Self::ChangeSource { .. } => "change-source",
            Self::StartReplica => "start-replica",
            Self::StopReplica => "stop-replica",
            Self::ResetReplicaAll => "reset-replica-all",
            Self::ShowReplicaStatus => "show-replica-status",
            Self::ExecutedPosition => "executed-position",
            Self::Sql(_) => "sql",
        }
    }

    /// Returns the client program this command runs with.
    pub fn client(&self) -> Client {
        match self {
            Self::Dump { .. } => Client::Mysqldump,
            _ => Client::Mysql,
        }
    }

    /// Returns the SQL this command sends with `mysql -e`.
    ///
    /// `None` for commands whose input arrives on stdin or that run with
    /// `mysqldump`.
    pub fn sql(&self) -> Option<String> {
        let sql = match self {
            Self::Ping => "SELECT 1".to_string(),
            Self::CreateUser { user, password } => format!(
                "CREATE USER IF NOT EXISTS {}@'%' IDENTIFIED BY {}",
                quote_literal(user),
                quote_literal(password)
            ),
            Self::DropUser { user } => {
                format!("DROP USER IF EXISTS {}@'%'", quote_literal(user))
            }
            Self::UserExists { user } => format!(
                "SELECT COUNT(*) FROM mysql.user WHERE user = {} AND host = '%'",
                quote_literal(user)
            ),
            Self::GrantReplication { user } => format!(
                "GRANT REPLICATION SLAVE ON *.* TO {}@'%'",
                quote_literal(user)
            ),
            Self::ShowDatabases => "SHOW DATABASES".to_string(),
            Self::CreateDatabase { name } => {
                format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(name))
            }
            Self::DropDatabase { name } => {
                format!("DROP DATABASE IF EXISTS {}", quote_ident(name))
            }
            Self::ResetBinaryLogs => "RESET MASTER".to_string(),
            Self::SetPurgedPosition { position } => {
                format!("SET @@GLOBAL.GTID_PURGED = {}", quote_literal(position))
            }
            Self::ChangeSource {
                host,
                port,
                user,
                password,
            } => format!(
                "CHANGE REPLICATION SOURCE TO SOURCE_HOST = {}, SOURCE_PORT = {}, \
                 SOURCE_USER = {}, SOURCE_PASSWORD = {}, SOURCE_AUTO_POSITION = 1, \
                 GET_SOURCE_PUBLIC_KEY = 1",
                quote_literal(host),
                port,
                quote_literal(user),
                quote_literal(password)
            ),
            Self::StartReplica => "START REPLICA".to_string(),
            Self::StopReplica => "STOP REPLICA".to_string(),
            Self::ResetReplicaAll => "RESET REPLICA ALL".to_string(),
            Self::ShowReplicaStatus => "SHOW REPLICA STATUS\\G".to_string(),
            Self::ExecutedPosition => "SELECT @@GLOBAL.gtid_executed".to_string(),
            Self::Sql(sql) => sql.clone(),
            Self::Dump { .. } | Self::Restore { .. } | Self::Import { .. } => return None,
        };
        Some(sql)
    }

    /// Returns the client argv for `node`, without the program name.
    ///
    /// The password is not part of the argv; backends pass it through the
    /// `MYSQL_PWD` environment variable.
    pub fn args(&self, node: &Node, use_network: bool) -> Vec<String> {
        let mut args = Vec::new();
        if use_network {
            args.push(format!("--host={}", node.address.host));
            args.push(format!("--port={}", node.address.port));
            args.push("--protocol=TCP".to_string());
        }
        args.push(format!("--user={}", node.credentials.user));

        match self {
            Self::Dump { databases } => {
                args.extend(
                    [
                        "--single-transaction",
                        "--routines",
                        "--triggers",
                        "--events",
                        "--hex-blob",
                        "--default-character-set=utf8mb4",
                        "--set-gtid-purged=ON",
                        "--databases",
                    ]
                    .map(String::from),
                );
                args.extend(databases.iter().cloned());
            }
            Self::Restore { .. } => {}
            Self::Import { database, .. } => args.push(database.clone()),
            Self::ShowReplicaStatus => {
                if let Some(sql) = self.sql() {
                    args.push("--execute".to_string());
                    args.push(sql);
                }
            }
            _ => {
                args.push("--batch".to_string());
                args.push("--skip-column-names".to_string());
                if let Some(sql) = self.sql() {
                    args.push("--execute".to_string());
                    args.push(sql);
                }
            }
        }
        args
    }

    /// Returns the payload written to the client's stdin.
    pub fn stdin(&self) -> Option<&[u8]> {
        match self {
            Self::Restore { payload } | Self::Import { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

impl fmt::Debug for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateUser { user, .. } => {
                f.debug_struct("CreateUser").field("user", user).finish_non_exhaustive()
            }
            Self::ChangeSource {
                host, port, user, ..
            } => f
                .debug_struct("ChangeSource")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Restore { payload } => f
                .debug_struct("Restore")
                .field("bytes", &payload.len())
                .finish(),
            Self::Import { database, payload } => f
                .debug_struct("Import")
                .field("database", database)
                .field("bytes", &payload.len())
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Quotes a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Quotes an identifier.
pub fn quote_ident(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// Schemas that belong to the server rather than to the application.
pub const SYSTEM_DATABASES: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

/// Returns true for server-owned schemas.
pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.contains(&name)
}

/// Extracts the GTID set a dump was taken at.
///
/// Looks for the `SET @@GLOBAL.GTID_PURGED=...` statement `mysqldump`
/// writes with `--set-gtid-purged=ON` and returns the last quoted value on
/// that line.
pub fn dump_position(payload: &[u8]) -> Option<PositionToken> {
    let text = String::from_utf8_lossy(payload);
    let line = text
        .lines()
        .find(|l| l.contains("GTID_PURGED") && l.trim_start().starts_with("SET"))?;

    let end = line.rfind('\'')?;
    let start = line[..end].rfind('\'')?;
    let value = &line[start + 1..end];
    (!value.is_empty()).then(|| PositionToken::new(value))
}

/// Returns the databases created by a dump, in order.
pub fn dump_databases(payload: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(payload);
    let mut names = Vec::new();
    for line in text.lines() {
        let Some(rest) = line.trim_start().strip_prefix("CREATE DATABASE") else {
            continue;
        };
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix("/*!32312 IF NOT EXISTS*/")
            .or_else(|| rest.strip_prefix("IF NOT EXISTS"))
            .unwrap_or(rest)
            .trim_start();
        if let Some(name) = rest.strip_prefix('`').and_then(|r| r.split('`').next()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairctl_core::{Credentials, NodeAddress, NodeId, NodeRole};

    fn node() -> Node {
        Node::new(
            NodeId(1),
            "mysql-1",
            NodeRole::Primary,
            NodeAddress::new("10.0.0.5", 3306),
            Credentials::new("root", "secret"),
        )
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_literal("o'neil"), "'o''neil'");
        assert_eq!(quote_ident("we`ird"), "`we``ird`");
        assert_eq!(
            AdminCommand::DropDatabase { name: "shop".into() }.sql().unwrap(),
            "DROP DATABASE IF EXISTS `shop`"
        );
        assert_eq!(
            AdminCommand::SetPurgedPosition {
                position: "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5".into()
            }
            .sql()
            .unwrap(),
            "SET @@GLOBAL.GTID_PURGED = '3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5'"
        );
    }

    #[test]
    fn test_args_keep_password_off_argv() {
        let cmd = AdminCommand::CreateUser {
            user: "repl".into(),
            password: "hunter2".into(),
        };
        let args = cmd.args(&node(), true);
        assert!(args.contains(&"--host=10.0.0.5".to_string()));
        assert!(args.contains(&"--user=root".to_string()));
        assert!(!args.iter().any(|a| a.contains("secret")));
        assert!(!format!("{:?}", cmd).contains("hunter2"));
    }

    #[test]
    fn test_dump_args() {
        let cmd = AdminCommand::Dump {
            databases: vec!["shop".into(), "billing".into()],
        };
        assert_eq!(cmd.client(), Client::Mysqldump);
        let args = cmd.args(&node(), false);
        assert!(!args.iter().any(|a| a.starts_with("--host")));
        assert!(args.ends_with(&[
            "--databases".to_string(),
            "shop".to_string(),
            "billing".to_string()
        ]));
        assert!(cmd.sql().is_none());
    }

    #[test]
    fn test_status_uses_vertical_output() {
        let args = AdminCommand::ShowReplicaStatus.args(&node(), false);
        assert_eq!(args.last().unwrap(), "SHOW REPLICA STATUS\\G");
        assert!(!args.contains(&"--batch".to_string()));
    }

    #[test]
    fn test_dump_position() {
        let dump = b"-- MySQL dump 10.13\n\
            SET @@SESSION.SQL_LOG_BIN= 0;\n\
            SET @@GLOBAL.GTID_PURGED=/*!80000 '+'*/ '3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77';\n\
            CREATE DATABASE /*!32312 IF NOT EXISTS*/ `shop` /*!40100 DEFAULT CHARACTER SET utf8mb4 */;\n\
            USE `shop`;\n\
            CREATE DATABASE /*!32312 IF NOT EXISTS*/ `billing`;\n";
        assert_eq!(
            dump_position(dump).unwrap().as_str(),
            "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77"
        );
        assert_eq!(dump_databases(dump), vec!["shop", "billing"]);
        assert!(dump_position(b"CREATE TABLE t (id int);").is_none());
    }
}
