use candle_core::{D, DType, Device, Module, Result, Tensor, Var};
use candle_nn::{Linear, VarBuilder, VarMap};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};

/// Parameter names in the order they are seeded and handed to the optimizer.
const PARAM_NAMES: [&str; 4] = ["hidden.weight", "hidden.bias", "output.weight", "output.bias"];

// Weights and bias drawn from U(-1/sqrt(fan_in), 1/sqrt(fan_in)).
fn seeded_uniform(fan_in: usize, shape: &[usize], rng: &mut StdRng, device: &Device) -> Result<Tensor> {
    let bound = 1.0 / (fan_in as f32).sqrt();
    let dist = Uniform::new_inclusive(-bound, bound);
    let count: usize = shape.iter().product();
    let values: Vec<f32> = (0..count).map(|_| dist.sample(rng)).collect();
    Tensor::from_vec(values, shape, device)
}

/// Maps a batch of return observations `[batch, assets]` to portfolio weights
/// `[batch, assets]` on the probability simplex.
///
/// Linear(assets -> hidden) -> ReLU -> Linear(hidden -> assets) -> softmax.
/// The softmax makes every output row non-negative and sum to one whatever
/// the parameters are, so even an untrained policy yields a valid allocation.
pub struct AllocationPolicy {
    hidden: Linear,
    output: Linear,
    vars: Vec<Var>,
    num_assets: usize,
    hidden_width: usize,
}

impl AllocationPolicy {
    pub fn new(num_assets: usize, hidden_width: usize, seed: Option<u64>, device: &Device) -> Result<Self> {
        if num_assets == 0 || hidden_width == 0 {
            candle_core::bail!(
                "policy needs at least one asset and one hidden unit (assets={}, hidden={})",
                num_assets,
                hidden_width
            );
        }

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let hidden = candle_nn::linear(num_assets, hidden_width, vb.pp("hidden"))?;
        let output = candle_nn::linear(hidden_width, num_assets, vb.pp("output"))?;

        // The CPU device cannot be seeded, so the initial values are drawn
        // here and written over what the builder allocated.
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let layouts: [(usize, Vec<usize>); 4] = [
            (num_assets, vec![hidden_width, num_assets]),
            (num_assets, vec![hidden_width]),
            (hidden_width, vec![num_assets, hidden_width]),
            (hidden_width, vec![num_assets]),
        ];
        for (name, (fan_in, shape)) in PARAM_NAMES.iter().zip(layouts.iter()) {
            varmap.set_one(*name, seeded_uniform(*fan_in, shape, &mut rng, device)?)?;
        }

        let vars = {
            let data = varmap
                .data()
                .lock()
                .map_err(|e| candle_core::Error::Msg(format!("varmap lock poisoned: {}", e)))?;
            PARAM_NAMES
                .iter()
                .map(|name| {
                    data.get(*name)
                        .cloned()
                        .ok_or_else(|| candle_core::Error::Msg(format!("missing parameter {}", name)))
                })
                .collect::<Result<Vec<Var>>>()?
        };

        Ok(Self {
            hidden,
            output,
            vars,
            num_assets,
            hidden_width,
        })
    }

    /// Trainable parameters, in layer order: hidden weight, hidden bias,
    /// output weight, output bias.
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    pub fn hidden_width(&self) -> usize {
        self.hidden_width
    }

    pub fn num_parameters(&self) -> usize {
        [&self.hidden, &self.output]
            .iter()
            .map(|l| l.weight().elem_count() + l.bias().map_or(0, |b| b.elem_count()))
            .sum()
    }

    /// Copy whose layers read detached parameter tensors, so evaluating it
    /// records no autograd graph. The copy has no trainable vars.
    pub fn frozen(&self) -> Self {
        let freeze = |l: &Linear| Linear::new(l.weight().detach(), l.bias().map(|b| b.detach()));
        Self {
            hidden: freeze(&self.hidden),
            output: freeze(&self.output),
            vars: Vec::new(),
            num_assets: self.num_assets,
            hidden_width: self.hidden_width,
        }
    }

    /// One allocation per input row. Any batch size >= 1 is accepted.
    pub fn evaluate(&self, batch: &Tensor) -> Result<Tensor> {
        let (rows, cols) = batch.dims2()?;
        if rows == 0 || cols != self.num_assets {
            candle_core::bail!(
                "policy expects a [batch >= 1, {}] input, got [{}, {}]",
                self.num_assets,
                rows,
                cols
            );
        }
        self.forward(batch)
    }
}

impl Module for AllocationPolicy {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let h = self.hidden.forward(xs)?.relu()?;
        let logits = self.output.forward(&h)?;
        candle_nn::ops::softmax(&logits, D::Minus1)
    }
}
