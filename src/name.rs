//! Domain names and labels.
//!
//! DNS names compare ASCII-case-insensitively, so [`Label`] and [`DomainName`]
//! implement `Eq`/`Ord`/`Hash` over the lowercased byte sequence while
//! preserving the spelling they were created with.

use std::{
    cmp::Ordering,
    fmt::{self, Write},
    hash::{Hash, Hasher},
    str::FromStr,
};

use crate::packet::DecodeError;

/// A `.`-separated component of a [`DomainName`].
///
/// Labels consist of arbitrary bytes; the wire format limits them to 63 bytes,
/// and empty labels only occur as the terminating root label, which this type
/// does not represent.
#[derive(Clone)]
pub struct Label {
    bytes: Box<[u8]>,
}

impl Label {
    /// The maximum length of a label in bytes (the length octet only has 6
    /// usable bits).
    pub const MAX_LEN: usize = 63;

    /// Creates a [`Label`] from raw bytes or a string slice.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is empty or longer than [`Self::MAX_LEN`].
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        Self::try_new(bytes)
            .unwrap_or_else(|_| panic!("`Label::new` called with invalid data: {:?}", bytes))
    }

    /// Creates a [`Label`] from raw bytes, rejecting empty and overlong input.
    pub fn try_new(bytes: impl AsRef<[u8]>) -> Result<Self, DecodeError> {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return Err(DecodeError::EmptyLabel);
        }
        if bytes.len() > Self::MAX_LEN {
            return Err(DecodeError::LabelTooLong);
        }
        Ok(Self {
            bytes: bytes.into(),
        })
    }

    /// Returns the raw bytes of this label.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn lower(&self) -> impl Iterator<Item = u8> + '_ {
        self.bytes.iter().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.eq_ignore_ascii_case(&other.bytes)
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lower().cmp(other.lower())
    }
}

impl Hash for Label {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.lower() {
            state.write_u8(b);
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#""{}""#, self.bytes.escape_ascii())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.bytes.escape_ascii().fmt(f)
    }
}

impl FromStr for Label {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

/// A domain name: a sequence of [`Label`]s, most specific first.
///
/// The terminating empty root label of the wire format is implicit and not
/// stored, so names can be extended label by label.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DomainName {
    labels: Vec<Label>,
}

impl DomainName {
    /// The empty root domain `.`.
    pub const ROOT: Self = Self { labels: Vec::new() };

    /// Parses a `.`-separated name; a trailing `.` is allowed but not
    /// required.
    pub fn from_str(s: &str) -> Result<Self, DecodeError> {
        s.parse()
    }

    /// Returns the labels making up this name, without the implicit root.
    #[inline]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Appends a [`Label`] to the end (towards the root) of this name.
    #[inline]
    pub fn push_label(&mut self, label: Label) {
        self.labels.push(label);
    }

    /// Splits the leading label off, returning it and the remaining parent
    /// name. Returns [`None`] for the root domain.
    pub fn split_first(&self) -> Option<(&Label, DomainName)> {
        let (first, rest) = self.labels.split_first()?;
        Some((
            first,
            DomainName {
                labels: rest.to_vec(),
            },
        ))
    }
}

impl Extend<Label> for DomainName {
    fn extend<T: IntoIterator<Item = Label>>(&mut self, iter: T) {
        self.labels.extend(iter)
    }
}

impl<'a> Extend<&'a Label> for DomainName {
    fn extend<T: IntoIterator<Item = &'a Label>>(&mut self, iter: T) {
        self.labels.extend(iter.into_iter().cloned())
    }
}

impl FromIterator<Label> for DomainName {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self {
            labels: Vec::from_iter(iter),
        }
    }
}

impl<'a> FromIterator<&'a Label> for DomainName {
    fn from_iter<T: IntoIterator<Item = &'a Label>>(iter: T) -> Self {
        Self {
            labels: iter.into_iter().cloned().collect(),
        }
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_char('.');
        }
        for label in &self.labels {
            label.fmt(f)?;
            f.write_char('.')?;
        }
        Ok(())
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for DomainName {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "." {
            // `split_terminator` would yield one empty label here.
            return Ok(Self::ROOT);
        }

        let mut name = DomainName::default();
        for label in s.split_terminator('.') {
            name.push_label(label.parse()?);
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        assert_eq!("..".parse::<DomainName>(), Err(DecodeError::EmptyLabel));
        assert_eq!(".local".parse::<DomainName>(), Err(DecodeError::EmptyLabel));
        assert_eq!(".".parse::<DomainName>(), Ok(DomainName::ROOT));
        assert_eq!("local".parse::<DomainName>().unwrap().to_string(), "local.");
        assert_eq!(
            "_http._tcp.local."
                .parse::<DomainName>()
                .unwrap()
                .to_string(),
            "_http._tcp.local."
        );
        assert_eq!(DomainName::ROOT.labels().len(), 0);
    }

    #[test]
    fn case_insensitive_eq() {
        let a: DomainName = "MyHost.local.".parse().unwrap();
        let b: DomainName = "myhost.LOCAL".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        // Display keeps the original spelling.
        assert_eq!(a.to_string(), "MyHost.local.");
    }

    #[test]
    fn split_first() {
        let name: DomainName = "web._http._tcp.local.".parse().unwrap();
        let (first, rest) = name.split_first().unwrap();
        assert_eq!(first.to_string(), "web");
        assert_eq!(rest.to_string(), "_http._tcp.local.");
        assert!(DomainName::ROOT.split_first().is_none());
    }

    #[test]
    fn escapes_non_ascii() {
        assert_eq!(format!("{}", Label::new("\n")), r"\n");
        assert_eq!(format!("{:?}", Label::new("a b")), r#""a b""#);
    }
}
