use log::warn;
use semver::Version;
use thiserror::Error;

/// Version assumed for the running binary when its embedded version string
/// does not parse. Update checks must never crash the host over a bad
/// build-time version.
pub const BASELINE_VERSION: (u64, u64, u64) = (0, 0, 1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("unparsable version string: {0:?}")]
    Unparsable(String),
}

/// Parse a version string, tolerating a single leading `v` marker and
/// missing minor/patch components ("1.2" is read as "1.2.0").
///
/// # Errors
/// Returns an error when the string is not a valid version; callers decide
/// whether that is fatal (remote versions) or falls back ([`running_version`]).
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    let raw = input.strip_prefix(['v', 'V']).unwrap_or(input);
    parse_semver(raw).ok_or_else(|| VersionError::Unparsable(input.to_string()))
}

/// Parse the running binary's own embedded version, falling back to the
/// fixed baseline instead of failing startup.
#[must_use]
pub fn running_version(embedded: &str) -> Version {
    parse_version(embedded).unwrap_or_else(|error| {
        warn!("embedded version did not parse, using baseline: {error}");
        let (major, minor, patch) = BASELINE_VERSION;
        Version::new(major, minor, patch)
    })
}

#[must_use]
pub fn is_newer(latest: &Version, current: &Version) -> bool {
    latest > current
}

fn parse_semver(version: &str) -> Option<Version> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let (core, suffix) = split_core_and_suffix(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().and_then(|part| part.parse::<u64>().ok());
    let patch = parts.next().and_then(|part| part.parse::<u64>().ok());

    if parts.next().is_some() {
        return None;
    }

    let normalized = match (minor, patch) {
        (None, None) => format!("{major}.0.0{suffix}"),
        (Some(minor), None) => format!("{major}.{minor}.0{suffix}"),
        (Some(minor), Some(patch)) => format!("{major}.{minor}.{patch}{suffix}"),
        (None, Some(_)) => return None,
    };

    Version::parse(&normalized).ok()
}

fn split_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_numeric_components() {
        let newer = [("2.0.0", "1.9.9"), ("1.2.0", "1.1.9"), ("1.0.1", "1.0.0")];
        for (latest, current) in newer {
            let latest = parse_version(latest).expect("latest should parse");
            let current = parse_version(current).expect("current should parse");
            assert!(is_newer(&latest, &current), "{latest} > {current}");
            assert!(!is_newer(&current, &latest));
        }

        let same = parse_version("1.0.0").expect("version should parse");
        assert!(!is_newer(&same, &same));
    }

    #[test]
    fn leading_marker_is_stripped() {
        assert_eq!(
            parse_version("v1.2.3").expect("prefixed version should parse"),
            parse_version("1.2.3").expect("bare version should parse"),
        );
    }

    #[test]
    fn partial_versions_are_normalized() {
        assert_eq!(
            parse_version("1.2").expect("partial version should parse"),
            parse_version("1.2.0").expect("full version should parse"),
        );
        assert_eq!(
            parse_version("1").expect("major-only version should parse"),
            parse_version("1.0.0").expect("full version should parse"),
        );
    }

    #[test]
    fn prerelease_orders_below_release() {
        let release = parse_version("1.0.0").expect("release should parse");
        let beta = parse_version("1.0.0-beta.2").expect("prerelease should parse");
        assert!(is_newer(&release, &beta));
    }

    #[test]
    fn garbage_is_a_hard_error() {
        assert!(matches!(
            parse_version("not-a-version"),
            Err(VersionError::Unparsable(_))
        ));
        assert!(parse_version("1.2.3.4").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn running_version_falls_back_to_baseline() {
        assert_eq!(running_version("garbage"), Version::new(0, 0, 1));
        assert_eq!(running_version("1.4.0"), Version::new(1, 4, 0));
    }
}
