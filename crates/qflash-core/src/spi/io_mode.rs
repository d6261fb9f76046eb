//! SPI I/O modes

/// I/O mode of a flash transaction
///
/// The device starts every frame in single-wire mode. Quad commands switch
/// the data path to four lines once their opcode (or address) is received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IoMode {
    /// One bit per clock on DQ0 (in) / DQ1 (out), carried in bit 0
    #[default]
    Single,
    /// Four bits per clock on DQ3..DQ0
    Quad,
}

impl IoMode {
    /// Number of bits moved per clock edge
    pub const fn width(&self) -> u32 {
        match self {
            Self::Single => 1,
            Self::Quad => 4,
        }
    }

    /// Mask selecting the valid data lines
    pub const fn mask(&self) -> u8 {
        match self {
            Self::Single => 0x01,
            Self::Quad => 0x0F,
        }
    }

}
