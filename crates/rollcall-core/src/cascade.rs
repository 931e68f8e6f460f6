//! Boosted Haar cascade: model description and per-window evaluation.
//!
//! A cascade is a sequence of stages, each a sum of decision stumps over
//! rectangle features. A window is accepted only if every stage's sum reaches
//! that stage's threshold. Feature responses are normalized by the window's
//! standard deviation (measured over the window inset by one pixel) so the
//! same cascade works under different exposure.
//!
//! Cascades load from OpenCV's XML format (both the `opencv-cascade-classifier`
//! layout and the older `opencv-haar-classifier` one) or from this crate's
//! own JSON form of [`CascadeModel`].

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cascade: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to parse cascade XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    Invalid(String),
}

/// One weighted rectangle of a Haar feature, in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Single-split weak classifier: `left` if the normalized feature value is
/// below `threshold`, `right` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub stumps: Vec<Stump>,
}

/// A complete cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
    pub features: Vec<HaarFeature>,
}

impl CascadeModel {
    /// Load a cascade file, OpenCV XML or JSON, telling them apart by content.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let model = if text.trim_start().starts_with('<') {
            Self::from_opencv_xml(&text)?
        } else {
            Self::from_json(&text)?
        };

        tracing::info!(
            path = %path.display(),
            window = ?(model.window_width, model.window_height),
            stages = model.stages.len(),
            features = model.features.len(),
            "loaded face cascade"
        );
        Ok(model)
    }

    pub fn from_json(text: &str) -> Result<Self, CascadeError> {
        let model: CascadeModel = serde_json::from_str(text)?;
        model.validate()?;
        Ok(model)
    }

    /// Parse an OpenCV HAAR/BOOST cascade. Only stump classifiers and upright
    /// features are supported.
    pub fn from_opencv_xml(text: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(text)?;
        let cascade = elements(doc.root_element())
            .next()
            .ok_or_else(|| invalid("cascade file has no classifier"))?;

        let model = if find_child(cascade, "stageType").is_some() {
            parse_current_layout(cascade)?
        } else {
            parse_legacy_layout(cascade)?
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width < 3 || self.window_height < 3 {
            return Err(invalid(format!(
                "window {}x{} is smaller than 3x3",
                self.window_width, self.window_height
            )));
        }
        if self.stages.is_empty() {
            return Err(invalid("cascade has no stages"));
        }

        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(invalid(format!("feature {i} has no rectangles")));
            }
            for r in &feature.rects {
                if r.x + r.width > self.window_width || r.y + r.height > self.window_height {
                    return Err(invalid(format!(
                        "feature {i} rectangle exceeds the detection window"
                    )));
                }
            }
        }

        for (s, stage) in self.stages.iter().enumerate() {
            if let Some(stump) = stage.stumps.iter().find(|st| st.feature >= self.features.len()) {
                return Err(invalid(format!(
                    "stage {s} references missing feature {}",
                    stump.feature
                )));
            }
        }
        Ok(())
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    ///
    /// The window must fit inside the integral image.
    pub fn accepts(&self, integral: &IntegralImage, x: u32, y: u32) -> bool {
        // Variance normalization over the window inset by one pixel.
        let nx = x + 1;
        let ny = y + 1;
        let nw = self.window_width - 2;
        let nh = self.window_height - 2;
        let area = (nw as f64) * (nh as f64);
        let sum = integral.sum(nx, ny, nw, nh) as f64;
        let sq_sum = integral.squared_sum(nx, ny, nw, nh) as f64;
        let spread = area * sq_sum - sum * sum;
        let norm = if spread > 0.0 { spread.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut total = 0.0f64;
            for stump in &stage.stumps {
                let feature = &self.features[stump.feature];
                let value: f64 = feature
                    .rects
                    .iter()
                    .map(|r| {
                        integral.sum(x + r.x, y + r.y, r.width, r.height) as f64 * r.weight as f64
                    })
                    .sum();

                total += if value / norm < stump.threshold as f64 {
                    stump.left as f64
                } else {
                    stump.right as f64
                };
            }
            if total < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

// --- OpenCV XML readers ---

fn invalid(msg: impl Into<String>) -> CascadeError {
    CascadeError::Invalid(msg.into())
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn find_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == name)
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>, CascadeError> {
    find_child(node, name)
        .ok_or_else(|| invalid(format!("<{}> is missing <{name}>", node.tag_name().name())))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, CascadeError> {
    Ok(child(node, name)?.text().unwrap_or("").trim())
}

fn number<T: FromStr>(text: &str, what: &str) -> Result<T, CascadeError> {
    text.trim()
        .parse()
        .map_err(|_| invalid(format!("{what}: cannot parse {text:?}")))
}

fn numbers<T: FromStr>(text: &str, what: &str) -> Result<Vec<T>, CascadeError> {
    text.split_whitespace().map(|t| number(t, what)).collect()
}

/// `"x y w h weight"`
fn parse_rect(node: Node) -> Result<WeightedRect, CascadeError> {
    let text = node.text().unwrap_or("");
    let parts: Vec<&str> = text.split_whitespace().collect();
    let [x, y, w, h, weight] = parts.as_slice() else {
        return Err(invalid(format!("malformed feature rectangle {text:?}")));
    };
    Ok(WeightedRect {
        x: number(x, "rect x")?,
        y: number(y, "rect y")?,
        width: number(w, "rect width")?,
        height: number(h, "rect height")?,
        weight: number(weight, "rect weight")?,
    })
}

fn parse_feature(node: Node) -> Result<HaarFeature, CascadeError> {
    if let Some(tilted) = find_child(node, "tilted") {
        if tilted.text().map(str::trim).unwrap_or("0") != "0" {
            return Err(invalid("tilted Haar features are not supported"));
        }
    }
    let rects = elements(child(node, "rects")?)
        .map(parse_rect)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HaarFeature { rects })
}

/// `<cascade type_id="opencv-cascade-classifier">`: stages of weak classifiers
/// referencing a shared feature list.
fn parse_current_layout(cascade: Node) -> Result<CascadeModel, CascadeError> {
    let stage_type = child_text(cascade, "stageType")?;
    let feature_type = child_text(cascade, "featureType")?;
    if stage_type != "BOOST" || feature_type != "HAAR" {
        return Err(invalid(format!(
            "unsupported cascade type {stage_type}/{feature_type}, expected BOOST/HAAR"
        )));
    }

    let features = elements(child(cascade, "features")?)
        .map(parse_feature)
        .collect::<Result<Vec<_>, _>>()?;

    let mut stages = Vec::new();
    for (s, stage) in elements(child(cascade, "stages")?).enumerate() {
        let threshold = number(child_text(stage, "stageThreshold")?, "stageThreshold")?;
        let mut stumps = Vec::new();
        for weak in elements(child(stage, "weakClassifiers")?) {
            // internalNodes: left right feature threshold; leaves are 0 and -1.
            let nodes: Vec<f64> = numbers(child_text(weak, "internalNodes")?, "internalNodes")?;
            let leaves: Vec<f32> = numbers(child_text(weak, "leafValues")?, "leafValues")?;
            match (nodes.as_slice(), leaves.as_slice()) {
                ([l, r, feature, split], [left, right])
                    if *l == 0.0 && *r == -1.0 && *feature >= 0.0 =>
                {
                    stumps.push(Stump {
                        feature: *feature as usize,
                        threshold: *split as f32,
                        left: *left,
                        right: *right,
                    });
                }
                _ => {
                    return Err(invalid(format!(
                        "stage {s}: only single-split weak classifiers are supported"
                    )))
                }
            }
        }
        stages.push(Stage { threshold, stumps });
    }

    Ok(CascadeModel {
        window_width: number(child_text(cascade, "width")?, "width")?,
        window_height: number(child_text(cascade, "height")?, "height")?,
        stages,
        features,
    })
}

/// `type_id="opencv-haar-classifier"`: every tree node carries its feature inline.
fn parse_legacy_layout(cascade: Node) -> Result<CascadeModel, CascadeError> {
    let size: Vec<u32> = numbers(child_text(cascade, "size")?, "size")?;
    let [window_width, window_height] = size.as_slice() else {
        return Err(invalid("size must be \"width height\""));
    };

    let mut features = Vec::new();
    let mut stages = Vec::new();
    for (s, stage) in elements(child(cascade, "stages")?).enumerate() {
        let threshold = number(child_text(stage, "stage_threshold")?, "stage_threshold")?;
        let mut stumps = Vec::new();
        for tree in elements(child(stage, "trees")?) {
            let nodes: Vec<Node> = elements(tree).collect();
            let [node] = nodes.as_slice() else {
                return Err(invalid(format!("stage {s}: only single-node trees are supported")));
            };
            if find_child(*node, "left_node").is_some() || find_child(*node, "right_node").is_some() {
                return Err(invalid(format!("stage {s}: only single-node trees are supported")));
            }

            features.push(parse_feature(child(*node, "feature")?)?);
            stumps.push(Stump {
                feature: features.len() - 1,
                threshold: number(child_text(*node, "threshold")?, "threshold")?,
                left: number(child_text(*node, "left_val")?, "left_val")?,
                right: number(child_text(*node, "right_val")?, "right_val")?,
            });
        }
        stages.push(Stage { threshold, stumps });
    }

    Ok(CascadeModel {
        window_width: *window_width,
        window_height: *window_height,
        stages,
        features,
    })
}

/// Summed-area tables of pixel values and squared pixel values, one row and
/// column larger than the source image.
pub struct IntegralImage {
    sums: Image<Luma<u64>>,
    squares: Image<Luma<u64>>,
}

impl IntegralImage {
    pub fn new(gray: &GrayImage) -> Self {
        Self {
            sums: integral_image::<_, u64>(gray),
            squares: integral_squared_image::<_, u64>(gray),
        }
    }

    fn area(table: &Image<Luma<u64>>, x: u32, y: u32, w: u32, h: u32) -> u64 {
        if w == 0 || h == 0 {
            return 0;
        }
        sum_image_pixels(table, x, y, x + w - 1, y + h - 1)[0]
    }

    /// Sum of pixels in `[x, x+w) × [y, y+h)`.
    pub fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::area(&self.sums, x, y, w, h)
    }

    /// Sum of squared pixels in `[x, x+w) × [y, y+h)`.
    pub fn squared_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::area(&self.squares, x, y, w, h)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 6×6 cascade with one stump: fires when the lower half of the window is
    /// clearly brighter than the upper half.
    pub(crate) fn edge_cascade() -> CascadeModel {
        CascadeModel {
            window_width: 6,
            window_height: 6,
            stages: vec![Stage {
                threshold: 0.0,
                stumps: vec![Stump { feature: 0, threshold: 1.0, left: -1.0, right: 1.0 }],
            }],
            features: vec![HaarFeature {
                rects: vec![
                    WeightedRect { x: 0, y: 0, width: 6, height: 3, weight: -1.0 },
                    WeightedRect { x: 0, y: 3, width: 6, height: 3, weight: 1.0 },
                ],
            }],
        }
    }

    fn split_window(top: u8, bottom: u8) -> GrayImage {
        GrayImage::from_fn(6, 6, |_, y| if y < 3 { Luma([top]) } else { Luma([bottom]) })
    }

    #[test]
    fn test_integral_sums() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let ii = IntegralImage::new(&gray);
        // Full image: 0 + 1 + ... + 11
        assert_eq!(ii.sum(0, 0, 4, 3), 66);
        // Middle 2×2 block: 5, 6, 9, 10
        assert_eq!(ii.sum(1, 1, 2, 2), 30);
        assert_eq!(ii.squared_sum(1, 1, 2, 2), 25 + 36 + 81 + 100);
        assert_eq!(ii.sum(2, 2, 0, 1), 0);
    }

    #[test]
    fn test_accepts_dark_over_bright() {
        let cascade = edge_cascade();
        let ii = IntegralImage::new(&split_window(0, 255));
        assert!(cascade.accepts(&ii, 0, 0));
    }

    #[test]
    fn test_rejects_uniform_and_inverted() {
        let cascade = edge_cascade();
        assert!(!cascade.accepts(&IntegralImage::new(&split_window(128, 128)), 0, 0));
        assert!(!cascade.accepts(&IntegralImage::new(&split_window(255, 0)), 0, 0));
    }

    #[test]
    fn test_variance_normalization_is_exposure_invariant() {
        let cascade = edge_cascade();
        // A faint edge is accepted just like a strong one.
        assert!(cascade.accepts(&IntegralImage::new(&split_window(100, 110)), 0, 0));
    }

    #[test]
    fn test_json_roundtrip_and_validation() {
        let json = serde_json::to_string(&edge_cascade()).unwrap();
        let model = CascadeModel::from_json(&json).unwrap();
        assert_eq!(model.window_width, 6);

        let mut bad = edge_cascade();
        bad.stages[0].stumps[0].feature = 3;
        let json = serde_json::to_string(&bad).unwrap();
        assert!(matches!(CascadeModel::from_json(&json), Err(CascadeError::Invalid(_))));

        let mut bad = edge_cascade();
        bad.features[0].rects[0].width = 7;
        let json = serde_json::to_string(&bad).unwrap();
        assert!(matches!(CascadeModel::from_json(&json), Err(CascadeError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = CascadeModel::load(Path::new("/nonexistent/cascade.json")).unwrap_err();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }

    /// The edge cascade in OpenCV's `opencv-cascade-classifier` layout.
    const EDGE_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 6 3 -1.</_>
        <_>
          0 3 6 3 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    #[test]
    fn test_opencv_xml_matches_json_model() {
        let model = CascadeModel::from_opencv_xml(EDGE_CASCADE_XML).unwrap();
        assert_eq!(model, edge_cascade());
        assert!(model.accepts(&IntegralImage::new(&split_window(0, 255)), 0, 0));
        assert!(!model.accepts(&IntegralImage::new(&split_window(255, 0)), 0, 0));
    }

    #[test]
    fn test_opencv_xml_rejects_tilted_features() {
        let xml = EDGE_CASCADE_XML.replace(
            "0 3 6 3 1.</_></rects>",
            "0 3 6 3 1.</_></rects>\n      <tilted>1</tilted>",
        );
        assert!(matches!(
            CascadeModel::from_opencv_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn test_opencv_xml_rejects_multi_split_trees() {
        let xml = EDGE_CASCADE_XML.replace("0 -1 0 1.", "1 -1 0 1.");
        assert!(matches!(
            CascadeModel::from_opencv_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));

        let xml = EDGE_CASCADE_XML.replace("<featureType>HAAR", "<featureType>LBP");
        assert!(matches!(
            CascadeModel::from_opencv_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn test_opencv_legacy_layout() {
        let xml = r#"<?xml version="1.0"?>
<opencv_storage>
<edge_6x6 type_id="opencv-haar-classifier">
  <size>6 6</size>
  <stages>
    <_>
      <!-- stage 0 -->
      <trees>
        <_>
          <!-- tree 0 -->
          <_>
            <!-- root node -->
            <feature>
              <rects>
                <_>0 0 6 3 -1.</_>
                <_>0 3 6 3 1.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>1.</threshold>
            <left_val>-1.</left_val>
            <right_val>1.</right_val></_></_></trees>
      <stage_threshold>0.</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_></stages></edge_6x6>
</opencv_storage>
"#;
        assert_eq!(CascadeModel::from_opencv_xml(xml).unwrap(), edge_cascade());

        let nested = xml.replace("<right_val>1.</right_val>", "<right_node>1</right_node>");
        assert!(matches!(
            CascadeModel::from_opencv_xml(&nested),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn test_opencv_xml_out_of_window_rect() {
        let xml = EDGE_CASCADE_XML.replace("0 3 6 3 1.", "0 3 6 4 1.");
        assert!(matches!(
            CascadeModel::from_opencv_xml(&xml),
            Err(CascadeError::Invalid(_))
        ));
        assert!(matches!(
            CascadeModel::from_opencv_xml("<opencv_storage><cascade>"),
            Err(CascadeError::Xml(_))
        ));
    }

    #[test]
    fn test_load_sniffs_xml() {
        let path = std::env::temp_dir()
            .join(format!("rollcall-cascade-{}.xml", std::process::id()));
        std::fs::write(&path, EDGE_CASCADE_XML).unwrap();
        let model = CascadeModel::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(model.unwrap(), edge_cascade());
    }
}
