/// Complement a single IUPAC nucleotide, preserving case. Unknown symbols
/// are returned unchanged.
pub fn complement(nt: u8) -> u8 {
    match nt {
        b'A' => b'T',
        b'T' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'U' => b'A',
        b'R' => b'Y',
        b'Y' => b'R',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        b'a' => b't',
        b't' => b'a',
        b'c' => b'g',
        b'g' => b'c',
        b'u' => b'a',
        _ => nt,
    }
}

/// ASCII offset used when rendering zero-based quality scores as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QualityEncoding {
    #[default]
    Phred33,
    /// CASAVA 1.3 to 1.7
    Phred64,
}

impl QualityEncoding {
    pub fn offset(&self) -> u8 {
        match self {
            QualityEncoding::Phred33 => 33,
            QualityEncoding::Phred64 => 64,
        }
    }

    /// Render a zero-based quality score, clamped to the printable range.
    pub fn encode(&self, qual: u8) -> u8 {
        qual.saturating_add(self.offset()).min(b'~')
    }

    pub fn encode_all(&self, quals: &[u8]) -> Vec<u8> {
        quals.iter().map(|&q| self.encode(q)).collect()
    }
}
