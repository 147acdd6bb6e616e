//! Tufos: composite entities folded from rows sharing an id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::row::{Guid, Row, Valu};

/// Reserved attribute naming the entity's kind. Every tufo has exactly one.
pub const FORM_PROP: &str = "tufo:form";

/// The folded view of all rows sharing an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tufo {
    pub id: Guid,
    pub props: HashMap<String, Valu>,
}

impl Tufo {
    pub fn new(id: Guid) -> Self {
        Self {
            id,
            props: HashMap::new(),
        }
    }

    /// The entity's form, read from the reserved `tufo:form` attribute.
    pub fn form(&self) -> Option<&str> {
        match self.props.get(FORM_PROP) {
            Some(Valu::Str(form)) => Some(form),
            _ => None,
        }
    }

    pub fn get(&self, full_prop: &str) -> Option<&Valu> {
        self.props.get(full_prop)
    }
}

/// Fold rows into tufos, grouped by id in first-seen order.
/// When the same `(id, prop)` appears in multiple rows the later row wins.
pub fn fold_rows(rows: impl IntoIterator<Item = Row>) -> Vec<Tufo> {
    let mut order: Vec<Guid> = Vec::new();
    let mut folds: HashMap<Guid, Tufo> = HashMap::new();
    for row in rows {
        let tufo = folds
            .entry(row.id.clone())
            .or_insert_with(|| {
                order.push(row.id.clone());
                Tufo::new(row.id.clone())
            });
        tufo.props.insert(row.prop, row.valu);
    }
    order.into_iter().filter_map(|id| folds.remove(&id)).collect()
}

/// Flatten a tufo back into its constituent rows, all stamped `time`.
/// Attribute order is not significant.
pub fn tufo_rows(tufo: &Tufo, time: i64) -> Vec<Row> {
    tufo.props
        .iter()
        .map(|(prop, valu)| Row {
            id: tufo.id.clone(),
            prop: prop.clone(),
            valu: valu.clone(),
            time,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_groups_by_id_in_first_seen_order() {
        let ida = Guid::new();
        let idb = Guid::new();
        let rows = vec![
            Row::new(ida.clone(), FORM_PROP, "foo", 0),
            Row::new(idb.clone(), FORM_PROP, "foo", 0),
            Row::new(ida.clone(), "foo:bar", 10, 0),
        ];
        let tufos = fold_rows(rows);
        assert_eq!(tufos.len(), 2);
        assert_eq!(tufos[0].id, ida);
        assert_eq!(tufos[1].id, idb);
        assert_eq!(tufos[0].get("foo:bar"), Some(&Valu::Int(10)));
        assert_eq!(tufos[0].form(), Some("foo"));
    }

    #[test]
    fn fold_later_row_wins_per_prop() {
        let id = Guid::new();
        let rows = vec![
            Row::new(id.clone(), "foo:bar", 1, 0),
            Row::new(id.clone(), "foo:bar", 2, 1),
        ];
        let tufos = fold_rows(rows);
        assert_eq!(tufos[0].get("foo:bar"), Some(&Valu::Int(2)));
    }

    #[test]
    fn fold_flatten_round_trip() {
        let id = Guid::new();
        let rows = vec![
            Row::new(id.clone(), FORM_PROP, "foo", 7),
            Row::new(id.clone(), "foo", "a", 7),
            Row::new(id.clone(), "foo:bar", 10, 7),
        ];
        let tufos = fold_rows(rows.clone());
        let flat = tufo_rows(&tufos[0], 7);
        let refolded = fold_rows(flat);
        assert_eq!(refolded, tufos);
    }
}
