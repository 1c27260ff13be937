use ctf_core::{parse_int_literal, CtfError, CtfValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parses `a.b[2].c[0x1]` into key and index segments.
pub(crate) fn parse_value_path(path: &str) -> Result<Vec<PathSegment>, CtfError> {
    let mut segments = Vec::new();

    for component in path.split('.').map(str::trim) {
        if component.is_empty() {
            return Err(invalid_path(path, "empty component"));
        }

        let (key, mut rest) = match component.find('[') {
            Some(open) => (&component[..open], &component[open..]),
            None => (component, ""),
        };
        let key = key.trim();
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        } else if segments.is_empty() && rest.is_empty() {
            return Err(invalid_path(path, "empty component"));
        }

        while !rest.is_empty() {
            let Some(body) = rest.strip_prefix('[') else {
                return Err(invalid_path(path, "text after index"));
            };
            let Some(close) = body.find(']') else {
                return Err(invalid_path(path, "unclosed index"));
            };
            let index = parse_int_literal(&body[..close])
                .and_then(|value| usize::try_from(value).ok())
                .ok_or_else(|| invalid_path(path, "index must be a non-negative integer"))?;
            segments.push(PathSegment::Index(index));
            rest = &body[close + 1..];
        }
    }

    Ok(segments)
}

pub(crate) fn read_path<'a>(root: &'a CtfValue, path: &str) -> Result<&'a CtfValue, CtfError> {
    let mut current = root;
    for segment in parse_value_path(path)? {
        current = match (&segment, current) {
            (PathSegment::Key(key), CtfValue::Dict(entries)) => entries.get(key),
            (PathSegment::Index(index), CtfValue::List(values)) => values.get(*index),
            _ => None,
        }
        .ok_or_else(|| missing_path(path, &segment))?;
    }
    Ok(current)
}

pub(crate) fn assign_path(root: &mut CtfValue, path: &str, value: CtfValue) -> Result<(), CtfError> {
    let segments = parse_value_path(path)?;
    assign_segments(root, path, &segments, value)
}

fn assign_segments(
    target: &mut CtfValue,
    path: &str,
    segments: &[PathSegment],
    value: CtfValue,
) -> Result<(), CtfError> {
    let Some((head, tail)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };

    let next = match (head, target) {
        (PathSegment::Key(key), CtfValue::Dict(entries)) => {
            if tail.is_empty() {
                entries.insert(key.clone(), value);
                return Ok(());
            }
            entries.get_mut(key)
        }
        (PathSegment::Index(index), CtfValue::List(values)) => values.get_mut(*index),
        _ => None,
    }
    .ok_or_else(|| missing_path(path, head))?;

    assign_segments(next, path, tail, value)
}

fn invalid_path(path: &str, reason: &str) -> CtfError {
    CtfError::parameter(
        "VALUE_PATH_INVALID",
        format!("Invalid attribute path \"{}\": {}.", path, reason),
        path,
    )
}

fn missing_path(path: &str, segment: &PathSegment) -> CtfError {
    let segment = match segment {
        PathSegment::Key(key) => format!("\"{}\"", key),
        PathSegment::Index(index) => format!("[{}]", index),
    };
    CtfError::parameter(
        "VALUE_PATH_MISSING",
        format!("Attribute {} of \"{}\" does not exist.", segment, path),
        path,
    )
}
