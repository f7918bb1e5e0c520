//! Small polytopes with known vertices, for tests and benchmarks.

use faer::Mat;

use crate::{math::vector_dot, problem::Problem, warmup::WarmupSolver};

/// Solves linear programs over a polytope whose vertices are known, by
/// picking the best vertex.
#[derive(Debug, Clone)]
pub struct VertexSolver {
    vertices: Vec<Box<[f64]>>,
}

impl VertexSolver {
    pub fn new(vertices: Vec<Box<[f64]>>) -> Self {
        Self { vertices }
    }

    /// All corners of a box problem without constraint rows.
    pub fn for_box(problem: &Problem) -> Self {
        let dim = problem.dim();
        assert!(problem.num_rows() == 0);
        assert!(dim < 16);
        let (lb, ub) = problem.variable_bounds();
        let vertices = (0..1usize << dim)
            .map(|mask| {
                (0..dim)
                    .map(|j| if mask & (1 << j) != 0 { ub[j] } else { lb[j] })
                    .collect()
            })
            .collect();
        Self { vertices }
    }
}

impl WarmupSolver for VertexSolver {
    fn maximize(
        &mut self,
        _problem: &Problem,
        objective: &[f64],
    ) -> anyhow::Result<Option<Box<[f64]>>> {
        let mut best: Option<(f64, &Box<[f64]>)> = None;
        for vertex in self.vertices.iter() {
            let value = vector_dot(vertex, objective);
            match best {
                Some((best_value, _)) if value <= best_value => {}
                _ => best = Some((value, vertex)),
            }
        }
        Ok(best.map(|(_, vertex)| vertex.clone()))
    }
}

/// The box `[-1, 1]^dim` with variables `m0, m1, ...` and no constraint rows.
pub fn unit_box(dim: usize) -> Problem {
    box_problem(vec![(-1., 1.); dim])
}

/// A box with the given variable bounds and no constraint rows.
pub fn box_problem(bounds: Vec<(f64, f64)>) -> Problem {
    let dim = bounds.len();
    let names = (0..dim).map(|i| format!("m{}", i)).collect();
    Problem::new(names, Mat::zeros(0, dim), vec![], bounds, true)
        .expect("Box problem must be valid")
}

/// Variables `atp_c`, `adp_c` in `[-1, 1]` and `ln_keq = atp_c + adp_c`,
/// with the corners of the square cut off by `|atp_c - adp_c| <= 1.5`.
///
/// Homogeneous, one equality and one inequality row. Only the first two
/// variables are metabolites.
pub fn cut_square() -> (Problem, VertexSolver) {
    let metabolites = vec!["atp_c".to_string(), "adp_c".to_string()];
    let matrix = Mat::from_fn(2, 3, |i, j| [[1., 1., -1.], [1., -1., 0.]][i][j]);
    let problem = Problem::new(
        vec!["atp_c".into(), "adp_c".into(), "ln_keq".into()],
        matrix,
        vec![(0., 0.), (-1.5, 1.5)],
        vec![(-1., 1.), (-1., 1.), (-2., 2.)],
        true,
    )
    .and_then(|problem| problem.with_included_metabolites(metabolites))
    .expect("Cut square must be valid");

    let xs = [1., -1., 1., 0.5, -1., -0.5];
    let ys = [1., -1., -0.5, -1., 0.5, 1.];
    let vertices = xs
        .iter()
        .zip(ys)
        .map(|(&x, y)| vec![x, y, x + y].into())
        .collect();
    (problem, VertexSolver::new(vertices))
}

/// The segment `g6p_c + f6p_c = -1` in `[-1, 0]^2` times `pi_c` in `[-2, -1]`.
///
/// The equality has a non-zero right hand side.
pub fn fixed_pool() -> (Problem, VertexSolver) {
    let matrix = Mat::from_fn(1, 3, |_, j| [1., 1., 0.][j]);
    let problem = Problem::new(
        vec!["g6p_c".into(), "f6p_c".into(), "pi_c".into()],
        matrix,
        vec![(-1., -1.)],
        vec![(-1., 0.), (-1., 0.), (-2., -1.)],
        false,
    )
    .expect("Fixed pool problem must be valid");

    let vertices = [
        [-1., 0., -2.],
        [-1., 0., -1.],
        [0., -1., -2.],
        [0., -1., -1.],
    ]
    .iter()
    .map(|v| v.to_vec().into())
    .collect();
    (problem, VertexSolver::new(vertices))
}
