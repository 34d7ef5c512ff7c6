//! Which corruption each client sees in each corruption slot.

use std::{
    error::Error,
    fmt::{self, Display},
    fs::File,
    path::{Path, PathBuf},
};

use log::info;
use ndarray::{Array2, ArrayD, Ix2};
use ndarray_npy::ReadNpyExt;

/// Errors raised while loading a persisted corruption assignment.
#[derive(Debug)]
pub enum AssignmentErr {
    Missing(PathBuf),
    Unreadable { path: PathBuf, reason: String },
    WrongRank { got: usize },
    WrongShape {
        got: (usize, usize),
        expected: (usize, usize),
    },
    OutOfRange {
        client: usize,
        slot: usize,
        value: i64,
        corruptions: usize,
    },
}

impl Display for AssignmentErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(path) => write!(f, "assignment file {} not found", path.display()),
            Self::Unreadable { path, reason } => {
                write!(f, "cannot read assignment {}: {reason}", path.display())
            }
            Self::WrongRank { got } => write!(f, "assignment must be 2-dimensional, got {got}"),
            Self::WrongShape { got, expected } => {
                write!(f, "assignment shape {got:?}, expected {expected:?}")
            }
            Self::OutOfRange {
                client,
                slot,
                value,
                corruptions,
            } => write!(
                f,
                "assignment[{client}][{slot}] = {value} is outside 0..{corruptions}"
            ),
        }
    }
}

impl Error for AssignmentErr {}

/// A `clients × corruptions` table of corruption indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionMap {
    /// Every client sees corruption `k` in slot `k`.
    Identity { clients: usize, corruptions: usize },
    /// A persisted per-client schedule.
    Continual(Array2<usize>),
}

impl CorruptionMap {
    /// Creates the non-continual assignment.
    pub fn identity(clients: usize, corruptions: usize) -> Self {
        Self::Identity {
            clients,
            corruptions,
        }
    }

    /// Loads a persisted assignment and checks it against the experiment.
    ///
    /// # Arguments
    /// * `path` - An `.npy` integer matrix.
    /// * `clients` - The expected amount of rows.
    /// * `corruptions` - The expected amount of columns, also the exclusive
    ///   upper bound of every entry.
    pub fn load(path: &Path, clients: usize, corruptions: usize) -> Result<Self, AssignmentErr> {
        if !path.is_file() {
            return Err(AssignmentErr::Missing(path.to_path_buf()));
        }

        let raw = read_integers(path)?;
        if raw.ndim() != 2 {
            return Err(AssignmentErr::WrongRank { got: raw.ndim() });
        }

        let raw = raw
            .into_dimensionality::<Ix2>()
            .map_err(|e| unreadable(path, e))?;

        if raw.dim() != (clients, corruptions) {
            return Err(AssignmentErr::WrongShape {
                got: raw.dim(),
                expected: (clients, corruptions),
            });
        }

        let mut map = Array2::zeros((clients, corruptions));
        for ((client, slot), &value) in raw.indexed_iter() {
            let index = usize::try_from(value)
                .ok()
                .filter(|&v| v < corruptions)
                .ok_or(AssignmentErr::OutOfRange {
                    client,
                    slot,
                    value,
                    corruptions,
                })?;
            map[[client, slot]] = index;
        }

        info!("loaded continual corruption assignment from {}", path.display());
        Ok(Self::Continual(map))
    }

    #[inline]
    pub fn clients(&self) -> usize {
        match self {
            Self::Identity { clients, .. } => *clients,
            Self::Continual(map) => map.nrows(),
        }
    }

    #[inline]
    pub fn corruptions(&self) -> usize {
        match self {
            Self::Identity { corruptions, .. } => *corruptions,
            Self::Continual(map) => map.ncols(),
        }
    }

    /// Returns the corruption index `client` sees in `slot`.
    ///
    /// # Panics
    /// If `client` or `slot` is out of range.
    pub fn get(&self, client: usize, slot: usize) -> usize {
        match self {
            Self::Identity { .. } => slot,
            Self::Continual(map) => map[[client, slot]],
        }
    }

    /// Counts how many slots assign `corruption` to `client`.
    pub fn uses(&self, client: usize, corruption: usize) -> usize {
        (0..self.corruptions())
            .filter(|&slot| self.get(client, slot) == corruption)
            .count()
    }
}

fn read_integers(path: &Path) -> Result<ArrayD<i64>, AssignmentErr> {
    let open = || File::open(path).map_err(|e| unreadable(path, e));

    if let Ok(array) = ArrayD::<i64>::read_npy(open()?) {
        return Ok(array);
    }

    if let Ok(array) = ArrayD::<i32>::read_npy(open()?) {
        return Ok(array.mapv(i64::from));
    }

    ArrayD::<u8>::read_npy(open()?)
        .map(|array| array.mapv(i64::from))
        .map_err(|e| unreadable(path, e))
}

fn unreadable(path: &Path, e: impl Display) -> AssignmentErr {
    AssignmentErr::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs, process};

    use ndarray::{Array1, array};
    use ndarray_npy::write_npy;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        env::temp_dir().join(format!("fedtta-{}-assign-{name}.npy", process::id()))
    }

    #[test]
    fn identity_assigns_slot_to_itself() {
        let map = CorruptionMap::identity(3, 4);

        for client in 0..3 {
            for slot in 0..4 {
                assert_eq!(map.get(client, slot), slot);
            }
        }
        assert_eq!(map.uses(1, 2), 1);
    }

    #[test]
    fn continual_map_loads_and_counts_repeats() {
        let path = scratch("ok");
        write_npy(&path, &array![[0_i64, 0], [1, 0]]).unwrap();

        let map = CorruptionMap::load(&path, 2, 2).unwrap();

        assert_eq!(map.get(1, 0), 1);
        assert_eq!(map.uses(0, 0), 2);
        assert_eq!(map.uses(0, 1), 0);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn narrow_integer_dtypes_are_accepted() {
        let path = scratch("i32");
        write_npy(&path, &array![[1_i32, 0]]).unwrap();

        assert_eq!(CorruptionMap::load(&path, 1, 2).unwrap().get(0, 0), 1);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn bad_assignments_are_rejected() {
        assert!(matches!(
            CorruptionMap::load(&scratch("absent"), 1, 1),
            Err(AssignmentErr::Missing(_))
        ));

        let path = scratch("rank");
        write_npy(&path, &Array1::<i64>::zeros(2)).unwrap();
        assert!(matches!(
            CorruptionMap::load(&path, 1, 2),
            Err(AssignmentErr::WrongRank { got: 1 })
        ));

        write_npy(&path, &array![[0_i64, 1]]).unwrap();
        assert!(matches!(
            CorruptionMap::load(&path, 2, 2),
            Err(AssignmentErr::WrongShape { .. })
        ));

        write_npy(&path, &array![[0_i64, 2]]).unwrap();
        assert!(matches!(
            CorruptionMap::load(&path, 1, 2),
            Err(AssignmentErr::OutOfRange { value: 2, .. })
        ));

        write_npy(&path, &array![[0.5_f32, 1.0]]).unwrap();
        assert!(matches!(
            CorruptionMap::load(&path, 1, 2),
            Err(AssignmentErr::Unreadable { .. })
        ));

        let _ = fs::remove_file(path);
    }
}
