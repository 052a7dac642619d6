use crate::errors::ContainerError;
use crate::types::Credentials;
use std::fmt;

/// First host identifier handed to an unprivileged container.
pub const UNPRIVILEGED_UID: u32 = 100_000;

/// The guest's system user. The credentials we start with take its place.
pub const ANDROID_SYSTEM_UID: u32 = 1000;

/// Size of the identifier space the guest expects.
pub const MAX_ID: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

impl IdKind {
    pub fn tag(self) -> char {
        match self {
            IdKind::User => 'u',
            IdKind::Group => 'g',
        }
    }
}

/// One `lxc.id_map` line: `length` identifiers starting at `sandbox_start`
/// inside the container map to the ones starting at `host_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRange {
    pub kind: IdKind,
    pub sandbox_start: u32,
    pub host_start: u32,
    pub length: u32,
}

impl IdentifierRange {
    pub fn sandbox_end(&self) -> u32 {
        self.sandbox_start + self.length
    }
}

impl fmt::Display for IdentifierRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.kind.tag(),
            self.sandbox_start,
            self.host_start,
            self.length
        )
    }
}

/**
 * Computes the identifier map for an unprivileged container.
 *
 * Per class (users, then groups) the guest space is split in three:
 * everything below the system user is shifted by `base`, the system user
 * itself maps onto the host identity from `creds` (it owns the sockets we
 * bind mount in), and everything above is shifted by `base` again. The
 * three ranges cover `[0, MAX_ID)` exactly once.
 *
 * Older configs start with `u 0 <base> <uid - 1>`, a layout that leaves gaps
 * and overlaps for most uids, so their low ranges differ from these.
 *
 * Entries are ordered the way the runtime expects them: the low ranges for
 * both classes, then the system ranges, then the high ranges.
 */
pub fn compute_id_map(
    creds: &Credentials,
    base: u32,
) -> Result<Vec<IdentifierRange>, ContainerError> {
    let uid = creds.uid.as_raw();
    let gid = creds.gid.as_raw();
    check_host_id("uid", uid, base)?;
    check_host_id("gid", gid, base)?;

    let low = |kind| IdentifierRange {
        kind,
        sandbox_start: 0,
        host_start: base,
        length: ANDROID_SYSTEM_UID,
    };
    let system = |kind, host_start| IdentifierRange {
        kind,
        sandbox_start: ANDROID_SYSTEM_UID,
        host_start,
        length: 1,
    };
    let high = |kind| IdentifierRange {
        kind,
        sandbox_start: ANDROID_SYSTEM_UID + 1,
        host_start: base + ANDROID_SYSTEM_UID + 1,
        length: MAX_ID - ANDROID_SYSTEM_UID - 1,
    };

    Ok(vec![
        low(IdKind::User),
        low(IdKind::Group),
        system(IdKind::User, uid),
        system(IdKind::Group, gid),
        high(IdKind::User),
        high(IdKind::Group),
    ])
}

fn check_host_id(
    what: &str,
    id: u32,
    base: u32,
) -> Result<(), ContainerError> {
    if id == 0 {
        return Err(ContainerError::InvalidCredentials(format!(
            "{} 0 can't be mapped onto the guest system user",
            what
        )));
    }
    // Identifiers past the 16 bit space are left undefined by the map layout
    if id >= MAX_ID {
        return Err(ContainerError::InvalidCredentials(format!(
            "{} {} is outside the mappable range [1, {})",
            what, id, MAX_ID
        )));
    }
    if base != 0 && id >= base && id < base.saturating_add(MAX_ID) {
        return Err(ContainerError::InvalidCredentials(format!(
            "{} {} collides with the shifted range starting at {}",
            what, id, base
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(ranges: &[IdentifierRange], kind: IdKind) -> Vec<IdentifierRange> {
        let mut out: Vec<_> =
            ranges.iter().filter(|r| r.kind == kind).cloned().collect();
        out.sort_by_key(|r| r.sandbox_start);
        out
    }

    #[test]
    fn test_ranges_cover_space_exactly_once() {
        for uid in [1002u32, 1500, 4242, 30000, 65535] {
            let creds = Credentials::new(uid, uid - 1);
            let ranges = compute_id_map(&creds, UNPRIVILEGED_UID).unwrap();
            assert_eq!(ranges.len(), 6);

            for kind in [IdKind::User, IdKind::Group] {
                let sorted = class(&ranges, kind);
                assert_eq!(sorted.iter().map(|r| r.length).sum::<u32>(), MAX_ID);
                assert_eq!(sorted[0].sandbox_start, 0);
                for pair in sorted.windows(2) {
                    assert_eq!(pair[0].sandbox_end(), pair[1].sandbox_start);
                }
                assert_eq!(sorted[sorted.len() - 1].sandbox_end(), MAX_ID);
            }
        }
    }

    #[test]
    fn test_system_user_maps_to_credentials() {
        let creds = Credentials::new(4000, 4001);
        let ranges = compute_id_map(&creds, UNPRIVILEGED_UID).unwrap();
        let user = class(&ranges, IdKind::User);
        let group = class(&ranges, IdKind::Group);

        assert_eq!(user[1].sandbox_start, ANDROID_SYSTEM_UID);
        assert_eq!(user[1].host_start, 4000);
        assert_eq!(user[1].length, 1);
        assert_eq!(group[1].host_start, 4001);

        assert_eq!(user[0].host_start, UNPRIVILEGED_UID);
        assert_eq!(user[2].host_start, UNPRIVILEGED_UID + ANDROID_SYSTEM_UID + 1);
    }

    #[test]
    fn test_render() {
        let creds = Credentials::new(1002, 1003);
        let lines: Vec<String> = compute_id_map(&creds, UNPRIVILEGED_UID)
            .unwrap()
            .iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "u 0 100000 1000",
                "g 0 100000 1000",
                "u 1000 1002 1",
                "g 1000 1003 1",
                "u 1001 101001 64535",
                "g 1001 101001 64535",
            ]
        );
    }

    #[test]
    fn test_invalid_credentials() {
        for (uid, gid) in [(0, 1000), (1000, 0), (65536, 1000), (100_500, 1000)]
        {
            let creds = Credentials::new(uid, gid);
            assert!(matches!(
                compute_id_map(&creds, UNPRIVILEGED_UID),
                Err(ContainerError::InvalidCredentials(_))
            ));
        }
    }
}
