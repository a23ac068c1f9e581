use glam::DVec3;

/// The extent of the simulation box along one axis, in nanometres.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct BoxBounds {
    pub min: f64,
    pub max: f64,
}

impl BoxBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bounds of a box anchored at the origin.
    pub fn from_length(length: f64) -> Self {
        Self::new(0.0, length)
    }

    pub fn length(&self) -> f64 {
        self.max - self.min
    }
}

/// One simulation snapshot.
///
/// Positions are box-relative (fractional) coordinates, stored per axis. Velocities are only
/// present when the trajectory stores them, and are in absolute units (nm/ps).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    pub timestep: i64,
    pub natoms: usize,
    pub bounds: [BoxBounds; 3],
    pub types: Vec<u32>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub velocities: Option<Vec<DVec3>>,
}

impl Frame {
    pub fn new(timestep: i64) -> Self {
        Self {
            timestep,
            ..Self::default()
        }
    }

    /// Size the per-atom arrays for `natoms` atoms.
    pub fn resize(&mut self, natoms: usize) {
        self.natoms = natoms;
        self.types.resize(natoms, 0);
        self.x.resize(natoms, 0.0);
        self.y.resize(natoms, 0.0);
        self.z.resize(natoms, 0.0);
    }

    /// Store the type and fractional position of the atom in `slot`.
    ///
    /// Returns `false`, leaving the frame untouched, if the slot is out of range.
    pub fn set_atom(&mut self, slot: usize, atom_type: u32, position: [f64; 3]) -> bool {
        if slot >= self.natoms {
            return false;
        }
        self.types[slot] = atom_type;
        self.x[slot] = position[0];
        self.y[slot] = position[1];
        self.z[slot] = position[2];
        true
    }

    pub fn is_empty(&self) -> bool {
        self.natoms == 0
    }

    pub fn lengths(&self) -> [f64; 3] {
        self.bounds.map(|b| b.length())
    }

    pub fn origin(&self) -> [f64; 3] {
        self.bounds.map(|b| b.min)
    }

    /// The fractional position of the atom in `slot`.
    pub fn position(&self, slot: usize) -> DVec3 {
        DVec3::new(self.x[slot], self.y[slot], self.z[slot])
    }

    /// Fill the positions from absolute coordinates, dividing by the box lengths.
    ///
    /// Axes with a degenerate (zero-length) box keep their absolute value.
    pub fn set_absolute_positions(&mut self, positions: impl IntoIterator<Item = [f64; 3]>) {
        let lengths = self.lengths();
        let fractional = |value: f64, axis: usize| {
            if lengths[axis] > 0.0 {
                (value - self.bounds[axis].min) / lengths[axis]
            } else {
                value
            }
        };
        let (mut x, mut y, mut z) = (Vec::new(), Vec::new(), Vec::new());
        for [px, py, pz] in positions {
            x.push(fractional(px, 0));
            y.push(fractional(py, 1));
            z.push(fractional(pz, 2));
        }
        self.natoms = x.len();
        self.x = x;
        self.y = y;
        self.z = z;
        self.types.resize(self.natoms, 0);
    }
}
