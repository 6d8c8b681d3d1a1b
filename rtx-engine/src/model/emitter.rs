//! Light emitting triangles.

use glam::{Mat4, Vec3};

use super::load::FlatScene;
use crate::shader::Emitter;

impl Emitter {
    /// Builds the emitter of one triangle, deriving its normal and area from the
    /// winding of the three vertices.
    #[must_use]
    pub fn from_triangle(vertices: [Vec3; 3], emission: Vec3, index: u32) -> Self {
        let [v0, v1, v2] = vertices;
        let cross = (v1 - v0).cross(v2 - v0);
        Self {
            point: Vec3::ZERO,
            v0,
            v1,
            v2,
            emission,
            // Degenerate triangles keep a zero normal instead of NaNs
            normal: cross.normalize_or_zero(),
            area: 0.5 * cross.length(),
            index,
        }
    }

    /// The same emitter with its vertices moved by `transform`.
    #[must_use]
    pub fn transformed(&self, transform: Mat4) -> Self {
        Self::from_triangle(
            [self.v0, self.v1, self.v2].map(|v| transform.transform_point3(v)),
            self.emission,
            self.index,
        )
    }
}

/// Collects every triangle whose material emits light, in triangle order.
#[must_use]
pub fn extract_emitters(scene: &FlatScene) -> Vec<Emitter> {
    scene
        .material_indices
        .iter()
        .enumerate()
        .filter_map(|(triangle, &material)| {
            let material = scene.materials.get(usize::try_from(material).ok()?)?;
            if !material.is_emissive() {
                return None;
            }
            let index = u32::try_from(triangle).ok()?;
            Some(Emitter::from_triangle(
                scene.triangle(triangle),
                material.emission,
                index,
            ))
        })
        .collect()
}

/// Sum of the emitters' areas.
#[must_use]
pub fn total_area(emitters: &[Emitter]) -> f32 {
    emitters.iter().map(|emitter| emitter.area).sum()
}

/// Probability of picking `emitter` when sampling proportionally to area.
///
/// Zero when the emitters have no area at all.
#[must_use]
pub fn selection_probability(emitter: &Emitter, total_area: f32) -> f32 {
    if total_area > 0.0 {
        emitter.area / total_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{Material, Vertex};

    const EPSILON: f32 = 1e-6;

    fn material(emission: Vec3) -> Material {
        Material {
            diffuse: Vec3::ONE,
            specular: Vec3::ZERO,
            emission,
            shininess: 0.0,
            texture_id: Material::UNTEXTURED,
        }
    }

    fn quad(emission: Vec3) -> FlatScene {
        let positions = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 3.0, 0.0),
            Vec3::new(0.0, 3.0, 0.0),
        ];
        FlatScene {
            vertices: positions
                .iter()
                .map(|&position| Vertex {
                    position,
                    ..Default::default()
                })
                .collect(),
            indices: vec![0, 1, 2, 0, 2, 3],
            materials: vec![material(emission)],
            material_indices: vec![0, 0],
            textures: Vec::new(),
        }
    }

    #[test]
    fn test_unit_triangle() {
        let emitter = Emitter::from_triangle(
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            Vec3::ONE,
            7,
        );
        assert!(emitter.normal.abs_diff_eq(Vec3::Z, EPSILON));
        assert!((emitter.area - 0.5).abs() < EPSILON);
        assert_eq!(emitter.index, 7);
    }

    #[test]
    fn test_degenerate_triangle() {
        let emitter = Emitter::from_triangle([Vec3::ZERO, Vec3::ZERO, Vec3::Y], Vec3::ONE, 0);
        assert_eq!(emitter.area, 0.0);
        assert_eq!(emitter.normal, Vec3::ZERO);

        let total = total_area(&[emitter]);
        assert_eq!(selection_probability(&emitter, total), 0.0);
    }

    #[test]
    fn test_extract_in_triangle_order() {
        let mut scene = quad(Vec3::splat(5.0));
        scene.materials.push(material(Vec3::ZERO));
        scene.material_indices = vec![1, 0];

        let emitters = extract_emitters(&scene);
        assert_eq!(emitters.len(), 1);
        assert_eq!(emitters[0].index, 1);
        assert_eq!(emitters[0].v2, Vec3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn test_non_emissive_scene_has_no_emitters() {
        assert!(extract_emitters(&quad(Vec3::ZERO)).is_empty());
    }

    #[test]
    fn test_quad_area_and_probabilities() {
        let emitters = extract_emitters(&quad(Vec3::splat(5.0)));
        assert_eq!(emitters.len(), 2);

        let total = total_area(&emitters);
        assert!((total - 6.0).abs() < EPSILON);
        let probabilities = emitters
            .iter()
            .map(|emitter| selection_probability(emitter, total))
            .sum::<f32>();
        assert!((probabilities - 1.0).abs() < EPSILON);
    }

    #[test]
    fn test_transformed_rederives_area() {
        let emitter = Emitter::from_triangle([Vec3::ZERO, Vec3::X, Vec3::Y], Vec3::ONE, 0);
        let moved = emitter.transformed(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_scale(Vec3::splat(2.0)),
        );
        assert!(moved.v0.abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), EPSILON));
        assert!((moved.area - 2.0).abs() < EPSILON);
        assert!(moved.normal.abs_diff_eq(Vec3::Z, EPSILON));
    }
}
