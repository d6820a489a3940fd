use std::collections::HashMap;

use lazy_static::lazy_static;

/// The three handler categories an object key can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DirectiveKind {
    /// Fetches external data and pushes it as a new lookup scope.
    Connector,
    /// Transforms or replaces its node's value.
    Writer,
    /// Side effect only; contributes a sub-result only when it returns one.
    Monitor,
}

lazy_static! {
    static ref DIRECTIVES: HashMap<&'static str, DirectiveKind> = {
        use DirectiveKind::*;
        let mut table = HashMap::new();
        for name in ["$DATA", "$GET", "$TRYGET"] {
            table.insert(name, Connector);
        }
        for name in [
            "$EACH", "$PIPE", "$JSON", "$ASSIGN", "$IF", "$REDUCE", "$MAP", "$CONCAT", "$SORT",
            "$VALUE", "$PUT", "$POST",
        ] {
            table.insert(name, Writer);
        }
        for name in ["$LOG", "$COUNT", "$SLEEP"] {
            table.insert(name, Monitor);
        }
        table
    };
}

/// Classify an object key. `None` means the key is ordinary data.
pub fn directive_kind(key: &str) -> Option<DirectiveKind> {
    DIRECTIVES.get(key).copied()
}
