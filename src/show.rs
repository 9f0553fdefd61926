use tabled::builder::Builder;
use tabled::settings::Style;

use crate::table::{Table, TableError};
use crate::util::Slice;
use crate::value::Value;

impl Table {
    /// Render the first `limit` rows as a plain-text grid.
    pub fn show(&self, limit: usize) -> Result<String, TableError> {
        let mut builder = Builder::default();
        builder.push_record(self.column_names());

        let head = self.slice(&Slice::range(0, limit as i64))?;
        for row in head.to_rows()? {
            builder.push_record(row.iter().map(|v| match v {
                Value::None => String::new(),
                other => other.to_string(),
            }));
        }
        if self.len() > limit {
            builder.push_record(self.column_names().iter().map(|_| "...".to_owned()));
        }

        let mut rendered = builder.build();
        rendered.with(Style::sharp());
        Ok(rendered.to_string())
    }
}
