//! Runtime configuration read from the Lambda environment

/// Endpoint of the DynamoDB emulator used by `sam local`
pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://dynamodb:8000";

const DEFAULT_EMAIL_FROM: &str = "koekalenteri@koekalenteri.snj.fi";

/// Table names of every store used by the functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub event: String,
    pub registration: String,
    pub event_type: String,
    pub judge: String,
    pub official: String,
    pub organizer: String,
    pub user: String,
    pub email_template: String,
    pub transaction: String,
    pub audit: String,
    pub ws_connections: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub tables: Tables,
    pub email_from: String,
    /// DynamoDB endpoint override, set when running under `sam local`
    pub local_endpoint: Option<String>,
    pub stage_name: Option<String>,
}

impl Config {
    /// Load configuration from process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using the given variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let local = lookup("AWS_SAM_LOCAL").is_some_and(|v| !v.is_empty());
        let table = |env: &str, default: &str| {
            let name = lookup(env)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string());
            if local {
                local_table_name(&name)
            } else {
                name
            }
        };

        let tables = Tables {
            event: table("EVENT_TABLE_NAME", "EventTable"),
            registration: table("REGISTRATION_TABLE_NAME", "RegistrationTable"),
            event_type: table("EVENT_TYPE_TABLE_NAME", "EventTypeTable"),
            judge: table("JUDGE_TABLE_NAME", "JudgeTable"),
            official: table("OFFICIAL_TABLE_NAME", "OfficialTable"),
            organizer: table("ORGANIZER_TABLE_NAME", "OrganizerTable"),
            user: table("USER_TABLE_NAME", "UserTable"),
            email_template: table("EMAIL_TEMPLATE_TABLE_NAME", "EmailTemplateTable"),
            transaction: table("TRANSACTION_TABLE_NAME", "TransactionTable"),
            audit: table("AUDIT_TABLE_NAME", "AuditTable"),
            ws_connections: table("WS_CONNECTIONS_TABLE_NAME", "WsConnectionsTable"),
        };

        let local_endpoint = local.then(|| {
            lookup("LOCAL_DYNAMODB_ENDPOINT")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_LOCAL_ENDPOINT.to_string())
        });

        Self {
            tables,
            email_from: lookup("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            local_endpoint,
            stage_name: lookup("STAGE_NAME"),
        }
    }

    pub fn is_local(&self) -> bool {
        self.local_endpoint.is_some()
    }
}

/// `sam local` does not expose the deployed table names, the emulator
/// tables are named in kebab-case instead: `EventTable` => `event-table`
pub fn local_table_name(table: &str) -> String {
    let mut out = String::with_capacity(table.len() + 4);
    let mut prev: Option<char> = None;
    for c in table.chars() {
        if c.is_ascii_uppercase() && prev.is_some_and(|p| p.is_ascii_alphabetic()) {
            out.push('-');
        }
        out.push(c.to_ascii_lowercase());
        prev = Some(c);
    }
    out
}
