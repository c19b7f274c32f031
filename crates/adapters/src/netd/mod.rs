pub mod legacy_rule_store;
