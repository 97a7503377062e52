pub mod app;
pub mod cli;
pub mod config;
pub mod loader;
pub mod logger;
pub mod sim;

pub mod utils {
    use std::fmt::Write;

    /// Hex dump of `xs[start..end]`, sixteen bytes per row.
    pub fn format_bytes(xs: &[u8], start: Option<usize>, end: Option<usize>) -> String {
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(xs.len()).min(xs.len());
        let minj = start / 16;
        let maxj = end.div_ceil(16);
        let mut out = String::new();
        out.push_str("    ");
        for i in 0..16 {
            let _ = write!(out, " {0:X} ", i);
        }
        out.push('\n');
        out.push_str("----");
        for _ in 0..16 {
            out.push_str("---");
        }
        for j in minj..maxj {
            let _ = write!(out, "\n{0:<2X}: ", j);
            for i in 0..16 {
                let addr = 16 * j + i;
                if (start <= addr) & (addr < end) {
                    let _ = write!(out, "{0:>02X} ", xs[addr]);
                }
            }
        }
        out
    }

}
