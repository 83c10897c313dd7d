const INDENT_SIZE: usize = 2;

/// Nested bullet lists for run summaries and batch reports. The writer seam
/// exists so tests can capture output instead of printing it.
pub struct BulletPointPrinter<W: LineWriter + Clone> {
    writer: W,
    depth: usize,
}

impl<W: LineWriter + Clone> BulletPointPrinter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, depth: 0 }
    }

    pub fn print_item(&self, message: impl std::fmt::Display) {
        let indent = " ".repeat(self.depth * INDENT_SIZE);
        self.writer.write_line(&format!("{}• {}", indent, message));
    }

    pub fn indent(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            depth: self.depth + 1,
        }
    }
}

impl BulletPointPrinter<StdoutLineWriter> {
    pub fn new_stdout() -> Self {
        Self::new(StdoutLineWriter)
    }
}

pub trait LineWriter {
    fn write_line(&self, line: &str);
}

#[derive(Clone, Copy)]
pub struct StdoutLineWriter;
impl LineWriter for StdoutLineWriter {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLineWriter(Rc<RefCell<Vec<String>>>);

    impl LineWriter for CapturedLineWriter {
        fn write_line(&self, line: &str) {
            self.0.borrow_mut().push(line.to_string());
        }
    }

    #[test]
    fn indentation_nests_by_two_spaces() {
        let writer = CapturedLineWriter::default();
        let printer = BulletPointPrinter::new(writer.clone());
        printer.print_item("run");
        let nested = printer.indent();
        nested.print_item("PROD-X");
        nested.indent().print_item("saved");
        printer.print_item("done");

        assert_eq!(
            vec![
                "• run".to_string(),
                "  • PROD-X".to_string(),
                "    • saved".to_string(),
                "• done".to_string(),
            ],
            *writer.0.borrow()
        );
    }
}
