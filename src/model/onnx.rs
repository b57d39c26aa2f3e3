use crate::error::InferenceError;
use crate::model::{Classifier, FeatureExtractor};
use ndarray::{Array2, Array4, ArrayView2};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::Value;
use std::sync::Mutex;

fn first_input_name(session: &Session) -> Result<String, InferenceError> {
    session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .ok_or_else(|| InferenceError::ModelFormat("model declares no inputs".to_string()))
}

/// Collapses every axis after the batch axis, so `[1, 7, 7, 2048]` becomes `[1, 100352]`.
pub fn flatten_batch(shape: &[i64], data: &[f32]) -> Result<Array2<f32>, InferenceError> {
    let dims: Vec<usize> = shape.iter().map(|&x| x.max(0) as usize).collect();
    let (&batch, rest) = dims.split_first().ok_or_else(|| InferenceError::ShapeMismatch {
        expected: vec![1, 0],
        got: dims.clone(),
    })?;
    let width = rest.iter().product::<usize>();
    Ok(Array2::from_shape_vec((batch, width), data.to_vec())?)
}

/// CNN backbone exported to ONNX (e.g. ResNet50 with global average pooling).
pub struct OnnxFeatureExtractor {
    session: Mutex<Session>,
    input_name: String,
}

impl OnnxFeatureExtractor {
    pub fn new(session: Session) -> Result<Self, InferenceError> {
        let input_name = first_input_name(&session)?;
        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }
}

impl FeatureExtractor for OnnxFeatureExtractor {
    fn extract(&self, input: Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        let shape = input.shape().to_vec();
        let (data, _) = input.into_raw_vec_and_offset();
        let input_value = Value::from_array((shape, data.into_boxed_slice()))?;

        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        flatten_batch(shape, data)
    }
}

/// Output names an ONNX classifier is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierOutputs {
    pub label: String,
    pub probabilities: Option<String>,
}

/// Picks the label (first int64 tensor) and probability (first float tensor)
/// outputs. Non-tensor outputs, such as a ZipMap sequence, have no element type.
pub fn select_outputs(
    outputs: &[(String, Option<TensorElementType>)],
) -> Result<ClassifierOutputs, InferenceError> {
    let output_of = |wanted: TensorElementType| {
        outputs
            .iter()
            .find(|(_, element_type)| *element_type == Some(wanted))
            .map(|(name, _)| name.clone())
    };

    let label = output_of(TensorElementType::Int64).ok_or_else(|| {
        InferenceError::ModelFormat("classifier has no int64 label output".to_string())
    })?;

    Ok(ClassifierOutputs {
        label,
        probabilities: output_of(TensorElementType::Float32),
    })
}

/// Tree ensemble converted to ONNX (onnxmltools / skl2onnx).
///
/// Converters that wrap probabilities in a ZipMap produce a sequence instead
/// of a tensor, which counts as "no probabilities".
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    outputs: ClassifierOutputs,
}

impl OnnxClassifier {
    pub fn new(session: Session) -> Result<Self, InferenceError> {
        let input_name = first_input_name(&session)?;
        let declared: Vec<(String, Option<TensorElementType>)> = session
            .outputs
            .iter()
            .map(|output| (output.name.clone(), output.output_type.tensor_type()))
            .collect();
        let outputs = select_outputs(&declared)?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            outputs,
        })
    }

    fn input_value(features: ArrayView2<'_, f32>) -> Result<Value, InferenceError> {
        let shape = features.shape().to_vec();
        let (data, _) = features.as_standard_layout().into_owned().into_raw_vec_and_offset();
        Ok(Value::from_array((shape, data.into_boxed_slice()))?.into_dyn())
    }

    /// One session run; both outputs are read from the same result.
    fn run(
        &self,
        features: ArrayView2<'_, f32>,
        with_probabilities: bool,
    ) -> Result<(i64, Option<Vec<f64>>), InferenceError> {
        let input_value = Self::input_value(features)?;
        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;

        let (_, labels) = outputs[self.outputs.label.as_str()].try_extract_tensor::<i64>()?;
        let label = labels
            .first()
            .copied()
            .ok_or_else(|| InferenceError::ModelFormat("classifier returned no label".to_string()))?;

        let probabilities: Option<Vec<f64>> = match &self.outputs.probabilities {
            Some(name) if with_probabilities => {
                let (shape, data) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
                let rows = flatten_batch(shape, data)?;
                (rows.nrows() > 0).then(|| rows.row(0).iter().map(|&p| p as f64).collect())
            }
            _ => None,
        };

        Ok((label, probabilities))
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: ArrayView2<'_, f32>) -> Result<i64, InferenceError> {
        Ok(self.run(features, false)?.0)
    }

    fn predict_proba(
        &self,
        features: ArrayView2<'_, f32>,
    ) -> Result<Option<Vec<f64>>, InferenceError> {
        Ok(self.run(features, true)?.1)
    }

    fn classify(
        &self,
        features: ArrayView2<'_, f32>,
        with_probabilities: bool,
    ) -> Result<(i64, Option<Vec<f64>>), InferenceError> {
        self.run(features, with_probabilities)
    }
}
