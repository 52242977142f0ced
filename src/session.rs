//! Session identifiers and the fixed bootstrap sequence sent immediately
//! after every connect (and replayed, together with a resubscribe of live
//! state, after every reconnect).

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use crate::auth::CredentialStore;
use crate::protocol::{envelope, method, QUOTE_FIELDS};

const SESSION_SUFFIX_LEN: usize = 12;

/// The two session identifiers a connection multiplexes: one quote
/// session carrying every subscribed symbol's snapshot stream, and one
/// chart session carrying every candle series and study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub quote_session: String,
    pub chart_session: String,
}

impl SessionIds {
    /// Generates a fresh pair. Called once per connection attempt; a
    /// reconnect gets new ids, since the server has no memory of the old
    /// ones once the socket drops.
    pub fn generate() -> Self {
        Self { quote_session: session_id("qs_"), chart_session: session_id("cs_") }
    }
}

fn session_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{prefix}{suffix}")
}

/// Builds the fixed four-message bootstrap every connection opens with:
/// authenticate, open the quote session, declare the quote fields of
/// interest, and open the chart session. Order matters — the server
/// rejects `quote_add_symbols` sent before `quote_create_session`, and
/// similarly for the chart session.
pub fn bootstrap_messages(ids: &SessionIds, credentials: &dyn CredentialStore) -> Vec<Value> {
    let fields: Vec<Value> = QUOTE_FIELDS.iter().map(|f| Value::String(f.to_string())).collect();
    let mut quote_set_fields_params = vec![Value::String(ids.quote_session.clone())];
    quote_set_fields_params.extend(fields);

    vec![
        envelope(method::SET_AUTH_TOKEN, vec![Value::String(credentials.auth_token())]),
        envelope(method::QUOTE_CREATE_SESSION, vec![Value::String(ids.quote_session.clone())]),
        envelope(method::QUOTE_SET_FIELDS, quote_set_fields_params),
        envelope(method::CHART_CREATE_SESSION, vec![Value::String(ids.chart_session.clone())]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;

    #[test]
    fn generated_session_ids_carry_the_expected_prefixes() {
        let ids = SessionIds::generate();
        assert!(ids.quote_session.starts_with("qs_"));
        assert!(ids.chart_session.starts_with("cs_"));
        assert_eq!(ids.quote_session.len(), 3 + 12);
    }

    #[test]
    fn bootstrap_sequence_has_the_four_fixed_messages_in_order() {
        let ids = SessionIds::generate();
        let creds = StaticCredentials::anonymous();
        let messages = bootstrap_messages(&ids, &creds);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["m"], "set_auth_token");
        assert_eq!(messages[1]["m"], "quote_create_session");
        assert_eq!(messages[2]["m"], "quote_set_fields");
        assert_eq!(messages[3]["m"], "chart_create_session");
        assert_eq!(messages[2]["p"][0], ids.quote_session.clone());
        assert_eq!(messages[2]["p"].as_array().unwrap().len(), 43);
    }
}
