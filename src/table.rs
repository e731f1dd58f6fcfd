use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Align {
    #[default]
    Left,
    Right,
}

/// Plain-text table with a header, a dashed rule, and space-padded columns.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    aligns: Vec<Align>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            aligns: vec![Align::Left; headers.len()],
            rows: Vec::new(),
        }
    }

    /// Right-aligns the given columns; used for counts.
    pub fn align_right(mut self, columns: &[usize]) -> Self {
        for &column in columns {
            if let Some(align) = self.aligns.get_mut(column) {
                *align = Align::Right;
            }
        }
        self
    }

    /// Missing trailing cells render empty; extra cells are ignored.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let header = self.cells(&self.headers);
        let body: Vec<_> = self.rows.iter().map(|row| self.cells(row)).collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count().max(3)).collect();
        for row in &body {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut output = String::new();
        self.write_line(&mut output, &header, &widths);
        let rule: Vec<Cow<'_, str>> = widths.iter().map(|w| Cow::Owned("-".repeat(*w))).collect();
        self.write_line(&mut output, &rule, &widths);
        for row in &body {
            self.write_line(&mut output, row, &widths);
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }

    fn cells<'a>(&self, row: &'a [String]) -> Vec<Cow<'a, str>> {
        (0..self.headers.len())
            .map(|idx| row.get(idx).map(|cell| flatten(cell)).unwrap_or(Cow::Borrowed("")))
            .collect()
    }

    fn write_line(&self, output: &mut String, cells: &[Cow<'_, str>], widths: &[usize]) {
        let mut line = String::new();
        for (idx, (cell, width)) in cells.iter().zip(widths).enumerate() {
            if idx > 0 {
                line.push_str("  ");
            }
            let _ = match self.aligns[idx] {
                Align::Left => write!(line, "{cell:<width$}"),
                Align::Right => write!(line, "{cell:>width$}"),
            };
        }
        let _ = writeln!(output, "{}", line.trim_end());
    }
}

/// Collapses line breaks and tabs so every row stays on one line.
fn flatten(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(
            value
                .chars()
                .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
                .collect(),
        )
    } else {
        Cow::Borrowed(value)
    }
}
