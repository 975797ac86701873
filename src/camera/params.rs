//! Parameter storage, file serialization and message transport.
//!
//! One [`ParameterSet`] describes one camera: the model family, identity
//! metadata, image dimensions and the flat intrinsic coefficient vector whose
//! length is fixed by [`ModelType::n_intrinsics`]. Files are YAML with a
//! stable key order so that write-then-read is a fixed point; the message
//! form ([`CameraInfoMessage`]) carries the same fields for inter-process
//! exchange.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

use crate::camera::{CameraModelError, ModelType};

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    model_type: ModelType,
    pub camera_name: String,
    pub camera_type: String,
    image_width: u32,
    image_height: u32,
    intrinsics: Vec<f64>,
}

impl ParameterSet {
    /// Creates a parameter set with zeroed coefficients; estimation or
    /// [`ParameterSet::set_intrinsics`] fills them in.
    pub fn new(
        model_type: ModelType,
        camera_name: impl Into<String>,
        camera_type: impl Into<String>,
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, CameraModelError> {
        if image_width == 0 || image_height == 0 {
            return Err(CameraModelError::InvalidParams(
                "image dimensions must be positive".to_string(),
            ));
        }
        Ok(ParameterSet {
            model_type,
            camera_name: camera_name.into(),
            camera_type: camera_type.into(),
            image_width,
            image_height,
            intrinsics: vec![0.0; model_type.n_intrinsics()],
        })
    }

    /// Convenience constructor with an explicit coefficient vector.
    pub fn with_intrinsics(
        model_type: ModelType,
        camera_name: impl Into<String>,
        camera_type: impl Into<String>,
        image_width: u32,
        image_height: u32,
        intrinsics: &[f64],
    ) -> Result<Self, CameraModelError> {
        let mut params = Self::new(
            model_type,
            camera_name,
            camera_type,
            image_width,
            image_height,
        )?;
        params.set_intrinsics(intrinsics)?;
        Ok(params)
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Number of intrinsic coefficients; pure function of the model type.
    pub fn n_intrinsics(&self) -> usize {
        self.model_type.n_intrinsics()
    }

    pub fn intrinsics(&self) -> &[f64] {
        &self.intrinsics
    }

    pub fn intrinsic(&self, idx: usize) -> f64 {
        self.intrinsics[idx]
    }

    pub(crate) fn intrinsics_mut(&mut self) -> &mut [f64] {
        &mut self.intrinsics
    }

    /// Replaces the coefficient vector; the length must match the family's
    /// declared count.
    pub fn set_intrinsics(&mut self, intrinsics: &[f64]) -> Result<(), CameraModelError> {
        if intrinsics.len() != self.n_intrinsics() {
            return Err(CameraModelError::DimensionMismatch {
                expected: self.n_intrinsics(),
                actual: intrinsics.len(),
            });
        }
        if intrinsics.iter().any(|v| !v.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "intrinsic coefficients must be finite".to_string(),
            ));
        }
        self.intrinsics.copy_from_slice(intrinsics);
        Ok(())
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CameraModelError> {
        let docs = YamlLoader::load_from_str(contents)?;
        if docs.is_empty() {
            return Err(CameraModelError::Parse("empty YAML document".to_string()));
        }
        let doc = &docs[0];

        let tag = doc["model_type"]
            .as_str()
            .ok_or_else(|| CameraModelError::Parse("missing 'model_type'".to_string()))?;
        let model_type = ModelType::parse(tag)
            .ok_or_else(|| CameraModelError::Parse(format!("unknown model type '{tag}'")))?;

        let camera_name = doc["camera_name"]
            .as_str()
            .ok_or_else(|| CameraModelError::Parse("missing 'camera_name'".to_string()))?
            .to_string();
        let camera_type = doc["camera_type"]
            .as_str()
            .ok_or_else(|| CameraModelError::Parse("missing 'camera_type'".to_string()))?
            .to_string();

        let image_width = yaml_integer(&doc["image_width"])
            .ok_or_else(|| CameraModelError::Parse("missing 'image_width'".to_string()))?;
        let image_height = yaml_integer(&doc["image_height"])
            .ok_or_else(|| CameraModelError::Parse("missing 'image_height'".to_string()))?;
        if image_width <= 0 || image_height <= 0 {
            return Err(CameraModelError::InvalidParams(
                "image dimensions must be positive".to_string(),
            ));
        }

        let coeffs = doc["intrinsics"]
            .as_vec()
            .ok_or_else(|| CameraModelError::Parse("missing 'intrinsics'".to_string()))?;
        let mut intrinsics = Vec::with_capacity(coeffs.len());
        for value in coeffs {
            intrinsics.push(yaml_number(value).ok_or_else(|| {
                CameraModelError::Parse("non-numeric intrinsic coefficient".to_string())
            })?);
        }

        ParameterSet::with_intrinsics(
            model_type,
            camera_name,
            camera_type,
            image_width as u32,
            image_height as u32,
            &intrinsics,
        )
    }

    /// Serializes with a fixed key order so the output is deterministic and
    /// `from_yaml_str(to_yaml_string())` reproduces the set field-for-field.
    pub fn to_yaml_string(&self) -> Result<String, CameraModelError> {
        let mapping = serde_yaml::Mapping::from_iter([
            (
                serde_yaml::Value::String("model_type".to_string()),
                serde_yaml::Value::String(self.model_type.as_str().to_string()),
            ),
            (
                serde_yaml::Value::String("camera_name".to_string()),
                serde_yaml::Value::String(self.camera_name.clone()),
            ),
            (
                serde_yaml::Value::String("camera_type".to_string()),
                serde_yaml::Value::String(self.camera_type.clone()),
            ),
            (
                serde_yaml::Value::String("image_width".to_string()),
                serde_yaml::Value::Number(self.image_width.into()),
            ),
            (
                serde_yaml::Value::String("image_height".to_string()),
                serde_yaml::Value::Number(self.image_height.into()),
            ),
            (
                serde_yaml::Value::String("intrinsics".to_string()),
                serde_yaml::to_value(&self.intrinsics)
                    .map_err(|e| CameraModelError::Parse(e.to_string()))?,
            ),
        ]);

        serde_yaml::to_string(&mapping).map_err(|e| CameraModelError::Parse(e.to_string()))
    }

    pub fn to_yaml_file(&self, path: &str) -> Result<(), CameraModelError> {
        let yaml = self.to_yaml_string()?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml.as_bytes())?;
        Ok(())
    }

    /// Converts to the transport form; agrees field-for-field with the file
    /// form.
    pub fn to_message(&self) -> CameraInfoMessage {
        CameraInfoMessage {
            model_type: self.model_type.as_str().to_string(),
            camera_name: self.camera_name.clone(),
            camera_type: self.camera_type.clone(),
            image_width: self.image_width,
            image_height: self.image_height,
            intrinsics: self.intrinsics.clone(),
        }
    }

    pub fn from_message(msg: &CameraInfoMessage) -> Result<Self, CameraModelError> {
        let model_type = ModelType::parse(&msg.model_type).ok_or_else(|| {
            CameraModelError::Parse(format!("unknown model type '{}'", msg.model_type))
        })?;
        ParameterSet::with_intrinsics(
            model_type,
            msg.camera_name.clone(),
            msg.camera_type.clone(),
            msg.image_width,
            msg.image_height,
            &msg.intrinsics,
        )
    }
}

/// Wire representation for inter-process parameter exchange.
///
/// Structurally equivalent to the parameter file; encode with `serde_json`
/// or any other serde format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfoMessage {
    pub model_type: String,
    pub camera_name: String,
    pub camera_type: String,
    pub image_width: u32,
    pub image_height: u32,
    pub intrinsics: Vec<f64>,
}

fn yaml_number(value: &Yaml) -> Option<f64> {
    match value {
        Yaml::Real(_) => value.as_f64(),
        Yaml::Integer(i) => Some(*i as f64),
        _ => None,
    }
}

fn yaml_integer(value: &Yaml) -> Option<i64> {
    match value {
        Yaml::Integer(i) => Some(*i),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> ParameterSet {
        ParameterSet::with_intrinsics(
            ModelType::Pinhole,
            "cam0",
            "monochrome",
            752,
            480,
            &[461.629, 460.152, 362.68, 246.049, -0.28, 0.07, 1.2e-4, -5.7e-5],
        )
        .unwrap()
    }

    #[test]
    fn yaml_round_trip_is_identity() {
        let params = sample_params();
        let yaml = params.to_yaml_string().unwrap();
        let back = ParameterSet::from_yaml_str(&yaml).unwrap();
        assert_eq!(params, back);
    }

    #[test]
    fn yaml_output_is_deterministic() {
        let params = sample_params();
        assert_eq!(
            params.to_yaml_string().unwrap(),
            params.to_yaml_string().unwrap()
        );
    }

    #[test]
    fn parse_accepts_integer_coefficients() {
        let yaml = "\
model_type: PINHOLE
camera_name: cam0
camera_type: color
image_width: 640
image_height: 480
intrinsics: [500, 500, 320, 240, 0, 0, 0, 0]
";
        let params = ParameterSet::from_yaml_str(yaml).unwrap();
        assert_eq!(params.intrinsic(0), 500.0);
        assert_eq!(params.intrinsic(2), 320.0);
    }

    #[test]
    fn parse_rejects_missing_fields() {
        let yaml = "camera_name: cam0\n";
        assert!(matches!(
            ParameterSet::from_yaml_str(yaml),
            Err(CameraModelError::Parse(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_coefficient_count() {
        let yaml = "\
model_type: FISHEYE
camera_name: cam0
camera_type: fisheye
image_width: 640
image_height: 480
intrinsics: [350.0, 350.0, 320.0, 240.0]
";
        assert!(matches!(
            ParameterSet::from_yaml_str(yaml),
            Err(CameraModelError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn parse_rejects_non_positive_dimensions() {
        let yaml = "\
model_type: PINHOLE
camera_name: cam0
camera_type: color
image_width: 0
image_height: 480
intrinsics: [500.0, 500.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0]
";
        assert!(matches!(
            ParameterSet::from_yaml_str(yaml),
            Err(CameraModelError::InvalidParams(_))
        ));
    }

    #[test]
    fn set_intrinsics_checks_length() {
        let mut params = sample_params();
        let err = params.set_intrinsics(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            CameraModelError::DimensionMismatch {
                expected: 8,
                actual: 2
            }
        ));
    }

    #[test]
    fn message_round_trip_matches_file_form() {
        let params = sample_params();
        let msg = params.to_message();
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: CameraInfoMessage = serde_json::from_str(&encoded).unwrap();
        let back = ParameterSet::from_message(&decoded).unwrap();
        assert_eq!(params, back);

        // Same fields as the YAML form
        let from_file = ParameterSet::from_yaml_str(&params.to_yaml_string().unwrap()).unwrap();
        assert_eq!(from_file.to_message(), msg);
    }
}
