//! The abstract streaming sink the hash table's formatter writes through.
//!
//! The full compile-time format-string engine this was distilled from is
//! out of scope (see spec §1); only the narrow capability the hash table
//! needs from it is modeled here, as a trait over `core::fmt::Write`-style
//! sinks so `HashTable`'s `Debug` impl doesn't care whether it's writing to
//! a `String`, a `Formatter`, or anything else that can append text.

use std::fmt;

/// A sink that can receive formatted text incrementally.
///
/// `core::fmt::Formatter` already satisfies this via the blanket impl below;
/// the trait exists so other sinks (e.g. a pre-sized `String` buffer) can
/// plug into the same rendering path without going through `Formatter`.
pub trait Sink {
    fn write_str(&mut self, s: &str) -> fmt::Result;

    fn write_char(&mut self, c: char) -> fmt::Result {
        let mut buf = [0u8; 4];
        self.write_str(c.encode_utf8(&mut buf))
    }

    fn write_fill(&mut self, c: char, n: usize) -> fmt::Result {
        for _ in 0..n {
            self.write_char(c)?;
        }
        Ok(())
    }
}

impl<W: fmt::Write> Sink for W {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        fmt::Write::write_str(self, s)
    }
}
