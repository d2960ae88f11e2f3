use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

/// Format "major.minor.bugfix".  Missing trailing components are zero, so "1.3" == "1.3.0".
/// Ordering is numeric, component by component.

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub bugfix: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16, bugfix: u16) -> Version {
        Version {
            major,
            minor,
            bugfix,
        }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(v: &str) -> Result<Version> {
        let mut parts = [0u16; 3];
        let mut n = 0;
        for component in v.trim().split('.') {
            if n == 3 {
                bail!("Too many components in version '{v}'");
            }
            match u16::from_str(component) {
                Ok(x) => parts[n] = x,
                Err(_) => bail!("Bad version '{v}'"),
            }
            n += 1;
        }
        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.bugfix)
    }
}

#[test]
fn test_version() {
    let v: Version = "1.3.0".parse().unwrap();
    assert!(v == Version::new(1, 3, 0));
    assert!("1.3".parse::<Version>().unwrap() == v);
    assert!("1.2.9".parse::<Version>().unwrap() < v);
    // Numeric, not lexicographic
    assert!("1.10.0".parse::<Version>().unwrap() > v);
    assert!("1.x".parse::<Version>().is_err());
    assert!("1.2.3.4".parse::<Version>().is_err());
    assert!(v.to_string() == "1.3.0");
}
