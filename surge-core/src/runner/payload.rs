use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use surge_value::{ObjectMap, Value};

use crate::config::{PayloadOrder, PayloadSpec};

/// Hands out payload rows to VUs, randomly or round-robin.
#[derive(Debug)]
pub struct PayloadCursor {
    name: Option<Arc<str>>,
    fields: Vec<Arc<str>>,
    rows: Vec<Vec<Value>>,
    order: PayloadOrder,
    next: AtomicUsize,
}

impl PayloadCursor {
    pub fn new(spec: &PayloadSpec) -> Self {
        Self {
            name: spec.name.as_deref().map(Arc::from),
            fields: spec.fields.iter().map(|f| Arc::from(f.as_str())).collect(),
            rows: spec
                .data
                .iter()
                .map(|row| row.iter().map(Value::from).collect())
                .collect(),
            order: spec.order,
            next: AtomicUsize::new(0),
        }
    }

    pub fn next_row(&self) -> Option<&[Value]> {
        if self.rows.is_empty() {
            return None;
        }
        let index = match self.order {
            PayloadOrder::Random => rand::rng().random_range(0..self.rows.len()),
            PayloadOrder::Sequence => self.next.fetch_add(1, Ordering::Relaxed) % self.rows.len(),
        };
        self.rows.get(index).map(Vec::as_slice)
    }

    /// Binds the next row's columns as VU variables.
    pub fn bind(&self, vars: &mut ObjectMap) {
        if let Some(row) = self.next_row() {
            self.bind_row(row, vars);
        }
    }

    /// Binds the first row without advancing a sequence cursor.
    pub fn bind_first(&self, vars: &mut ObjectMap) {
        if let Some(row) = self.rows.first() {
            self.bind_row(row, vars);
        }
    }

    // Fields are always bound; a named payload also gets the row as one object.
    fn bind_row(&self, row: &[Value], vars: &mut ObjectMap) {
        for (field, value) in self.fields.iter().zip(row.iter()) {
            vars.insert(Arc::clone(field), value.clone());
        }
        if let Some(name) = &self.name {
            let object: ObjectMap = self
                .fields
                .iter()
                .zip(row.iter())
                .map(|(field, value)| (Arc::clone(field), value.clone()))
                .collect();
            vars.insert(Arc::clone(name), Value::Object(object));
        }
    }
}
