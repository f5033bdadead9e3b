use std::fmt;

/// One segment of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bare key: `outlet`
    Key(String),
    /// Key with index: `actions[1]` — indexes a repeated-key sibling group
    /// or a list-valued child's items, depending on context.
    Indexed { key: String, index: usize },
    /// Bare index: `[1]` — the nth child of the current node.
    Index(usize),
}

impl Segment {
    pub fn key(&self) -> Option<&str> {
        match self {
            Segment::Key(k) => Some(k),
            Segment::Indexed { key, .. } => Some(key),
            Segment::Index(_) => None,
        }
    }

    pub fn index(&self) -> Option<usize> {
        match self {
            Segment::Indexed { index, .. } | Segment::Index(index) => Some(*index),
            Segment::Key(_) => None,
        }
    }
}

/// Parsed form of the public addressing string, e.g. `outlet.maxY.name`,
/// `actions[1].faceSet` or `blocks[0]`.
///
/// Parsing never fails: a malformed bracket expression is kept as a plain
/// key segment and simply won't resolve, matching the engine-wide policy of
/// absent results over errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    segments: Vec<Segment>,
}

impl Route {
    pub fn parse(route: &str) -> Route {
        let mut segments = Vec::new();

        for part in route.split('.') {
            if part.is_empty() {
                continue;
            }
            segments.push(parse_segment(part));
        }

        Route { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Key of the final segment, bracket stripped.
    pub fn last_key(&self) -> Option<&str> {
        self.segments.last().and_then(|s| s.key())
    }

    /// Index of the final segment, if it is bracketed.
    pub fn last_index(&self) -> Option<usize> {
        self.segments.last().and_then(|s| s.index())
    }

    /// Route without its final segment.
    pub fn parent(&self) -> Route {
        let mut segments = self.segments.clone();
        segments.pop();
        Route { segments }
    }
}

fn parse_segment(part: &str) -> Segment {
    if let Some(open) = part.find('[') {
        if part.ends_with(']') {
            let key = &part[..open];
            let idx = &part[open + 1..part.len() - 1];
            if let Ok(index) = idx.parse::<usize>() {
                if key.is_empty() {
                    return Segment::Index(index);
                }
                return Segment::Indexed {
                    key: key.to_string(),
                    index,
                };
            }
        }
    }
    Segment::Key(part.to_string())
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match seg {
                Segment::Key(k) => write!(f, "{}", k)?,
                Segment::Indexed { key, index } => write!(f, "{}[{}]", key, index)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}
