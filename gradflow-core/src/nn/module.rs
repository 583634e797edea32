use std::fmt::Debug;

use log::trace;

use crate::autograd::{GradValue, Graph, Node};
use crate::mat::DType;
use crate::nn::Parameter;

/// The base trait for models and layers holding learnable parameters.
///
/// Implementors list their own parameters and their direct sub-modules;
/// everything that walks a model tree (collecting parameters, zeroing
/// gradients, binding them into a graph) is built on these two methods.
pub trait Module<T: DType>: Debug + Send + Sync {
    /// The module's direct parameters with the field name they live under.
    fn named_parameters(&self) -> Vec<(String, &Parameter<T>)>;

    /// The module's direct sub-modules with the field name they live under.
    /// Leaf modules keep the default.
    fn named_children(&self) -> Vec<(String, &dyn Module<T>)> {
        Vec::new()
    }

    /// The module's direct parameters.
    fn parameters(&self) -> Vec<&Parameter<T>> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }
}

/// Visits the parameters of `module`, depth-first, with their dotted path
/// (`"encoder.weight"`). Sub-modules are visited only if `explore_children`.
pub fn for_each_parameter<T, F>(module: &dyn Module<T>, explore_children: bool, mut callback: F)
where
    T: DType,
    F: FnMut(&str, &Parameter<T>),
{
    visit(module, "", explore_children, &mut callback);
}

fn visit<T, F>(module: &dyn Module<T>, prefix: &str, explore_children: bool, callback: &mut F)
where
    T: DType,
    F: FnMut(&str, &Parameter<T>),
{
    for (name, param) in module.named_parameters() {
        callback(&join_path(prefix, &name), param);
    }
    if !explore_children {
        return;
    }
    for (name, child) in module.named_children() {
        visit(child, &join_path(prefix, &name), true, callback);
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Handles to every parameter of the module tree, in visiting order.
pub fn collect_parameters<T: DType>(module: &dyn Module<T>) -> Vec<Parameter<T>> {
    let mut params = Vec::new();
    for_each_parameter(module, true, |_, p| params.push(p.clone()));
    params
}

/// Drops the gradients of every parameter of the module tree.
pub fn zero_grad<T: DType>(module: &dyn Module<T>) {
    for_each_parameter(module, true, |_, p| p.zero_grad());
}

/// Wraps every parameter of the module tree into `graph`.
///
/// With `trainable`, gradients reaching the wrappers flow into the
/// parameters; otherwise the parameters act as constants for this graph.
pub fn bind_parameters<T: DType>(
    graph: &Graph<T>,
    module: &dyn Module<T>,
    trainable: bool,
) -> Vec<(String, Node<T>)> {
    let mut bound = Vec::new();
    for_each_parameter(module, true, |path, p| {
        let node = if trainable {
            graph.new_wrap(p.clone())
        } else {
            graph.new_wrap_no_grad(p.clone())
        };
        trace!("bound parameter {} as node {}", path, node.id());
        bound.push((path.to_string(), node));
    });
    bound
}
