//! Deterministic table aliases.
//!
//! Aliases are assigned positionally along a relation chain: the root table
//! first, then one alias per joined table, junction tables included. The
//! same chain therefore always yields the same aliases, which lets separate
//! compilation steps refer to the same joined table without coordination.

use crate::schema::Relation;

/// Alias for the table at `index`: `A`..`Z`, then `A26`, `A27`, ...
pub fn alias(index: usize) -> String {
    if index < 26 {
        ((b'A' + index as u8) as char).to_string()
    } else {
        format!("A{}", index)
    }
}

/// Number of tables joined along a chain, the root table included.
pub fn table_count(chain: &[Relation]) -> usize {
    1 + chain.iter().map(Relation::table_count).sum::<usize>()
}

/// Aliases for a chain, starting at `A`.
pub fn aliases(chain: &[Relation]) -> Vec<String> {
    aliases_from(chain, 0)
}

/// Aliases for a chain, starting at the alias with index `start`.
pub fn aliases_from(chain: &[Relation], start: usize) -> Vec<String> {
    (start..start + table_count(chain)).map(alias).collect()
}

/// Alias of the final target table of a chain.
pub fn target_alias(aliases: &[String]) -> &str {
    aliases.last().map(String::as_str).unwrap_or("A")
}

/// Alias of the table reached after `level` relation steps (junctions
/// skipped), for every level from the root to the end of the chain.
pub fn level_aliases(chain: &[Relation], aliases: &[String]) -> Vec<String> {
    let mut levels = Vec::with_capacity(chain.len() + 1);
    let mut index = 0;
    levels.push(aliases[index].clone());
    for relation in chain {
        index += relation.table_count();
        levels.push(aliases[index].clone());
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, Junction, TableRef};

    fn chain() -> Vec<Relation> {
        let t = |name: &str| TableRef::new(name, "id", "id");
        vec![
            Relation::direct(Cardinality::OneToOne, t("a"), "b_fk", t("b"), "id"),
            Relation::many_to_many(
                t("b"),
                "id",
                Junction {
                    table: t("b_c"),
                    source_field: "b_id".into(),
                    target_field: "c_id".into(),
                },
                t("c"),
                "id",
            ),
        ]
    }

    #[test]
    fn test_aliases() {
        assert_eq!(aliases(&chain()), vec!["A", "B", "C", "D"]);
        assert_eq!(aliases_from(&chain(), 1), vec!["B", "C", "D", "E"]);
        assert_eq!(aliases(&[]), vec!["A"]);
    }

    #[test]
    fn test_aliases_are_deterministic() {
        let first = aliases(&chain());
        let _ = aliases(&chain()[..1]);
        assert_eq!(first, aliases(&chain()));
    }

    #[test]
    fn test_level_aliases_skip_junction() {
        let chain = chain();
        let names = aliases(&chain);
        assert_eq!(level_aliases(&chain, &names), vec!["A", "B", "D"]);
        assert_eq!(target_alias(&names), "D");
    }

    #[test]
    fn test_alias_overflow() {
        assert_eq!(alias(25), "Z");
        assert_eq!(alias(26), "A26");
    }
}
