use std::fmt;

// Hex dump of a datagram, sixteen bytes per row, for trace logging.
pub struct Hex<'a>(&'a [u8]);

impl<'a> Hex<'a>
{
    pub fn new<T>(data: &'a T) -> Hex<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        Hex(data.as_ref())
    }
}

impl fmt::Display for Hex<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for (row, chunk) in self.0.chunks(16).enumerate()
        {
            if row > 0
            {
                writeln!(f)?;
            }

            write!(f, "{:04x} ", row * 16)?;
            for byte in chunk
            {
                write!(f, " {:02x}", byte)?;
            }
        }

        Ok(())
    }
}
