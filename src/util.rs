use {
    anyhow::Result,
    serde::{
        de::DeserializeOwned,
        Serialize,
    },
    std::{
        fs::{
            self,
            File,
        },
        io::Write,
        path::Path,
    },
};


/// Write a value to a file as pretty ron.
pub fn write_config<T: Serialize + ?Sized>(
    value: &T,
    path: impl AsRef<Path>,
) -> Result<()> {
    File::create(path)?.write_all(
        ron::ser::to_string_pretty(
            value,
            ron::ser::PrettyConfig::default(),
        )?.as_bytes()
    )?;
    Ok(())
}

pub fn read_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    Ok(ron::from_str(&fs::read_to_string(path)?)?)
}

/// Write a value to a file as pretty json.
pub fn write_json<T: Serialize + ?Sized>(
    value: &T,
    path: impl AsRef<Path>,
) -> Result<()> {
    serde_json::to_writer_pretty(File::create(path)?, value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Mean and (population) standard deviation. Both are NaN for an empty slice.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}


#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{
            collections::BTreeMap,
            env::temp_dir,
        },
    };

    #[test]
    fn mean_std_of_known_values() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(mean, 5.0);
        assert_eq!(std, 2.0);

        let (mean, std) = mean_std(&[]);
        assert!(mean.is_nan() && std.is_nan());
    }

    #[test]
    fn configs_round_trip_through_ron_and_json() -> Result<()> {
        let dir = temp_dir();
        let value: BTreeMap<String, f64> = [("gamma".to_owned(), 0.99), ("tau".to_owned(), 0.01)].into();

        let ron_path = dir.join(format!("arm_ddpg_util_{}.ron", std::process::id()));
        write_config(&value, &ron_path)?;
        assert_eq!(read_config::<BTreeMap<String, f64>>(&ron_path)?, value);

        let json_path = dir.join(format!("arm_ddpg_util_{}.json", std::process::id()));
        write_json(&value, &json_path)?;
        assert_eq!(read_json::<BTreeMap<String, f64>>(&json_path)?, value);

        fs::remove_file(ron_path)?;
        fs::remove_file(json_path)?;
        Ok(())
    }
}
