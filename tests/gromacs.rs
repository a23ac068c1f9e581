mod common;

use common::{assert_close, cluster, write_gro, write_trr, write_xtc, TrrFrame};
use mdingest::{load_trajectory, Error, Format, LoadOptions, TrajectoryReader, Window};

const WATER: [&str; 3] = ["OW", "HW1", "HW2"];

fn trr_frames(velocities: bool) -> Vec<TrrFrame> {
    (0..3)
        .map(|step| {
            let positions: Vec<[f32; 3]> = (0..3)
                .map(|i| [0.2 + 0.1 * i as f32, 0.5, 0.5 + 0.05 * step as f32])
                .collect();
            TrrFrame {
                step,
                time: step as f32 * 0.5,
                boxdiag: [2.0; 3],
                velocities: velocities.then(|| vec![[1.0, 2.0, 3.0]; positions.len()]),
                positions,
            }
        })
        .collect()
}

mod trr {
    use super::*;

    #[test]
    fn velocities_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        let gro = dir.path().join("conf.gro");
        write_trr(&path, &trr_frames(true));
        write_gro(&gro, &WATER);

        let options = LoadOptions::new(&path).coordinates(&gro).time_step(0.5);
        let mut reader = TrajectoryReader::open(&options).unwrap();
        assert_eq!(reader.format(), Format::Trr);
        assert_eq!(reader.atom_types().unwrap().name(2), Some("HW1"));

        let series = reader.read_series().unwrap();
        assert_eq!(series.len(), 3);
        for (i, atom) in series.iter().enumerate() {
            assert_eq!(atom.atom_type, i as u32 + 1);
            assert_eq!(atom.time, [0.0, 0.5, 1.0]);
            for sample in 0..3 {
                let position = atom.position_at(sample).unwrap();
                assert_close(position.x, 0.2 + 0.1 * i as f64, 1e-6);
                assert_close(position.z, 0.5 + 0.05 * sample as f64, 1e-6);
                assert_eq!(atom.velocity_at(sample).unwrap().to_array(), [1.0, 2.0, 3.0]);
                assert_eq!(atom.box_at(sample).unwrap().to_array(), [2.0; 3]);
            }
        }
    }

    #[test]
    fn velocities_are_derived() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        let gro = dir.path().join("conf.gro");
        write_trr(&path, &trr_frames(false));
        write_gro(&gro, &WATER);

        let options = LoadOptions::new(&path).coordinates(&gro).time_step(0.5);
        let series = load_trajectory(&options);
        assert_eq!(series.len(), 3);
        for atom in &series {
            for sample in 0..3 {
                let velocity = atom.velocity_at(sample).unwrap();
                assert_close(velocity.x, 0.0, 1e-6);
                assert_close(velocity.z, 0.1, 1e-5);
            }
        }
    }

    #[test]
    fn coordinates_are_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        write_trr(&path, &trr_frames(true));

        let options = LoadOptions::new(&path);
        assert!(matches!(
            TrajectoryReader::open(&options),
            Err(Error::MissingCompanion { .. })
        ));
        assert!(load_trajectory(&options).is_empty());

        let options = LoadOptions::new(&path).coordinates(dir.path().join("conf.pdb"));
        assert!(matches!(
            TrajectoryReader::open(&options),
            Err(Error::MissingCompanion { .. })
        ));
    }

    #[test]
    fn coordinates_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.trr");
        let gro = dir.path().join("conf.gro");
        write_trr(&path, &trr_frames(true));
        write_gro(&gro, &["OW", "HW1", "HW2", "MW"]);

        let options = LoadOptions::new(&path).coordinates(&gro);
        let mut reader = TrajectoryReader::open(&options).unwrap();
        assert!(matches!(
            reader.read_series(),
            Err(Error::AtomCountMismatch {
                frame: 0,
                expected: 4,
                found: 3
            })
        ));
        assert!(load_trajectory(&options).is_empty());
    }
}

mod xtc {
    use super::*;

    const NATOMS: usize = 20;

    fn frames(nframes: i64) -> Vec<(i64, Vec<[f32; 3]>)> {
        (0..nframes).map(|step| (step, cluster(NATOMS, step))).collect()
    }

    #[test]
    fn without_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.xtc");
        write_xtc(&path, [5.0; 3], &frames(4));

        let series = load_trajectory(&LoadOptions::new(&path));
        assert_eq!(series.len(), NATOMS);
        for (i, atom) in series.iter().enumerate() {
            assert_eq!(atom.atom_type, 0);
            assert_eq!(atom.time, [0.0, 1.0, 2.0, 3.0]);
            for sample in 0..4 {
                let expected = cluster(NATOMS, sample as i64)[i];
                let position = atom.position_at(sample).unwrap();
                for (actual, expected) in position.to_array().into_iter().zip(expected) {
                    assert_close(actual, expected as f64, 1e-3);
                }
                assert_close(atom.velocity_at(sample).unwrap().x, 0.01, 1.5e-3);
                assert_eq!(atom.box_at(sample).unwrap().to_array(), [5.0; 3]);
            }
        }
    }

    #[test]
    fn with_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.xtc");
        let gro = dir.path().join("conf.gro");
        write_xtc(&path, [5.0; 3], &frames(2));
        let names: Vec<&str> = (0..NATOMS).map(|i| WATER[i % 3]).collect();
        write_gro(&gro, &names);

        let series = load_trajectory(&LoadOptions::new(&path).coordinates(&gro));
        let types: Vec<u32> = series.iter().map(|atom| atom.atom_type).collect();
        let expected: Vec<u32> = (0..NATOMS).map(|i| i as u32 % 3 + 1).collect();
        assert_eq!(types, expected);
    }

    #[test]
    fn windowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.xtc");
        write_xtc(&path, [5.0; 3], &frames(6));

        let options = LoadOptions::new(&path)
            .window(Window::new(0, 2, 5))
            .time_step(2.0);
        let series = load_trajectory(&options);
        assert_eq!(series.len(), NATOMS);
        assert_eq!(series[0].len(), 2);
        assert_close(series[0].position[0][0], cluster(NATOMS, 1)[0][0] as f64, 1e-3);
        assert_close(series[0].position[0][1], cluster(NATOMS, 3)[0][0] as f64, 1e-3);
        assert_close(series[0].velocity[0][1], 0.01, 1e-3);
    }

    #[test]
    fn compressed_xtc_is_unknown() {
        let options = LoadOptions::new("traj.xtc.gz");
        assert!(matches!(
            TrajectoryReader::open(&options),
            Err(Error::UnknownFormat(_))
        ));
    }
}
