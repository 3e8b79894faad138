//! Log setup for the `aula` binary.

use std::env;

use tracing_subscriber::EnvFilter;

/// Variables consulted for filter directives, most specific first.
const FILTER_VARS: [&str; 3] = ["RUST_LOG", "AULA_CLI_LOG", "AULA_LOG"];

/// Quiet dependencies; keep our own crates at `info`.
const FALLBACK_DIRECTIVES: &str = "warn,aula=info,aula_client=info,aula_core=info";

/// Install the global subscriber. Logs go to stderr; stdout carries command
/// output only.
pub fn init() {
    let directives = pick_directives(|key| env::var(key).ok());
    let filter =
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(FALLBACK_DIRECTIVES));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}

/// First non-blank, parseable directive string among [`FILTER_VARS`].
/// Unparseable values are skipped rather than silencing all output.
fn pick_directives<F>(mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    FILTER_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|raw| raw.trim().to_owned())
        .find(|raw| !raw.is_empty() && EnvFilter::try_new(raw).is_ok())
        .unwrap_or_else(|| FALLBACK_DIRECTIVES.to_owned())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn pick(pairs: &[(&str, &str)]) -> String {
        let vars = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect::<HashMap<_, _>>();
        pick_directives(|key| vars.get(key).cloned())
    }

    #[test]
    fn falls_back_when_nothing_is_set() {
        assert_eq!(pick(&[]), FALLBACK_DIRECTIVES);
    }

    #[test]
    fn rust_log_wins_over_app_variables() {
        let chosen = pick(&[
            ("RUST_LOG", "trace"),
            ("AULA_CLI_LOG", "debug"),
            ("AULA_LOG", "error"),
        ]);
        assert_eq!(chosen, "trace");
    }

    #[test]
    fn blank_and_invalid_values_are_skipped() {
        let chosen = pick(&[
            ("RUST_LOG", "   "),
            ("AULA_CLI_LOG", "aula=loud"),
            ("AULA_LOG", " aula_client=debug "),
        ]);
        assert_eq!(chosen, "aula_client=debug");
    }
}
