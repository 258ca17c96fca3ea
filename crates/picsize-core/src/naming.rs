use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// `<base>_<W>x<H>_cm`, optionally followed by a collision suffix `_<n>`.
static SIZE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.*)_(?P<w>\d+)x(?P<h>\d+)_cm(?:_\d+)?$").unwrap()
});

/// File names considered taken in one directory for the length of one run.
///
/// Seeded from the directory listing and kept in lock-step with every
/// rename or write the run performs. Not shared between runs or threads.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    taken: HashSet<String>,
}

impl NameRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.taken.insert(name.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.taken.remove(name)
    }

    /// First free name among `stem+ext`, `stem_1+ext`, `stem_2+ext`, ...
    ///
    /// `ext` includes its leading dot (or is empty). Does not register the
    /// result; callers do that once the name is actually used.
    pub fn allocate(&self, stem: &str, ext: &str) -> String {
        let first = format!("{}{}", stem, ext);
        if !self.contains(&first) {
            return first;
        }
        let mut counter = 1u32;
        loop {
            let candidate = format!("{}_{}{}", stem, counter, ext);
            if !self.contains(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Split a file name into stem and extension (with the dot).
pub fn split_name(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => file_name.split_at(pos),
        _ => (file_name, ""),
    }
}

/// Remove a trailing size tag for exactly `width_cm` x `height_cm`, so a
/// file renamed earlier keeps its name: `holiday_25x25_cm_1` becomes
/// `holiday` for a 25x25 image. Tags for any other size are part of the
/// user's name and stay.
pub fn strip_size_tag(stem: &str, width_cm: i64, height_cm: i64) -> &str {
    let Some(caps) = SIZE_TAG_RE.captures(stem) else {
        return stem;
    };
    let same_size = caps["w"].parse::<i64>().ok() == Some(width_cm)
        && caps["h"].parse::<i64>().ok() == Some(height_cm);
    match caps.name("base") {
        Some(base) if same_size => base.as_str(),
        _ => stem,
    }
}

/// Desired stem for an image of the given whole-centimeter size.
pub fn size_tagged_stem(stem: &str, width_cm: i64, height_cm: i64) -> String {
    format!(
        "{}_{}x{}_cm",
        strip_size_tag(stem, width_cm, height_cm),
        width_cm,
        height_cm
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_name() {
        let registry = NameRegistry::new(["other.png"]);
        assert_eq!(registry.allocate("photo", ".png"), "photo.png");
    }

    #[test]
    fn test_allocate_smallest_suffix() {
        let registry = NameRegistry::new(["a.png", "a_1.png", "a_3.png"]);
        assert_eq!(registry.allocate("a", ".png"), "a_2.png");
    }

    #[test]
    fn test_allocate_is_deterministic_until_registered() {
        let mut registry = NameRegistry::new(["a.jpg"]);
        let first = registry.allocate("a", ".jpg");
        assert_eq!(first, registry.allocate("a", ".jpg"));
        assert_eq!(first, "a_1.jpg");

        registry.insert(first);
        assert_eq!(registry.allocate("a", ".jpg"), "a_2.jpg");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("photo.JPG"), ("photo", ".JPG"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".hidden"), (".hidden", ""));
    }

    #[test]
    fn test_strip_size_tag() {
        assert_eq!(strip_size_tag("holiday_25x25_cm", 25, 25), "holiday");
        assert_eq!(strip_size_tag("holiday_25x25_cm_3", 25, 25), "holiday");
        assert_eq!(strip_size_tag("holiday", 25, 25), "holiday");
        assert_eq!(strip_size_tag("holiday_25x25", 25, 25), "holiday_25x25");
    }

    #[test]
    fn test_other_size_tag_is_kept() {
        assert_eq!(strip_size_tag("sample_3x4_cm", 10, 10), "sample_3x4_cm");
        assert_eq!(size_tagged_stem("sample_3x4_cm", 10, 10), "sample_3x4_cm_10x10_cm");
        assert_eq!(size_tagged_stem("a_10x10_cm_2", 10, 10), "a_10x10_cm");
    }
}
