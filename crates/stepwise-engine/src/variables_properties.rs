//! Property tests for variable substitution

use proptest::prelude::*;
use serde_json::json;

use crate::variables::VariableScope;

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}"
}

proptest! {
    /// Text without a `$` is never changed
    #[test]
    fn prop_text_without_tokens_is_unchanged(text in "[^$]{0,64}") {
        let mut scope = VariableScope::new();
        scope.set("x", json!("value"), None);
        prop_assert_eq!(scope.substitute(&text), text);
    }

    /// Both token forms resolve to the bound string
    #[test]
    fn prop_bound_names_resolve(name in name_strategy(), value in "[a-zA-Z0-9 ]{0,16}") {
        let mut scope = VariableScope::new();
        scope.set(name.clone(), json!(value.clone()), None);

        prop_assert_eq!(scope.substitute(&format!("${{{}}}", name)), value.clone());
        prop_assert_eq!(scope.substitute(&format!("<${}>", name)), format!("<{}>", value));
    }

    /// Unbound names survive substitution exactly
    #[test]
    fn prop_unbound_names_are_verbatim(name in name_strategy()) {
        let scope = VariableScope::new();
        let braced = format!("${{{}}}", name);
        let bare = format!("${} tail", name);

        prop_assert_eq!(scope.substitute(&braced), braced.clone());
        prop_assert_eq!(scope.substitute(&bare), bare.clone());
    }
}
