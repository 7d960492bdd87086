//! Ordered fallback chains: each layer may supply a value, the first wins.

type Layer<'a, T> = (&'static str, Box<dyn FnOnce() -> Option<T> + 'a>);

/// A named field resolved from layers consulted in insertion order.
pub(crate) struct Chain<'a, T> {
    field: &'static str,
    layers: Vec<Layer<'a, T>>,
}

impl<'a, T> Chain<'a, T> {
    pub(crate) fn new(field: &'static str) -> Self {
        Self {
            field,
            layers: Vec::new(),
        }
    }

    pub(crate) fn layer(mut self, name: &'static str, f: impl FnOnce() -> Option<T> + 'a) -> Self {
        self.layers.push((name, Box::new(f)));
        self
    }

    /// Value of the first layer that returns `Some`.
    pub(crate) fn first_present(self) -> Option<T> {
        let field = self.field;
        self.layers.into_iter().find_map(|(name, layer)| {
            let value = layer();
            if value.is_some() {
                log::debug!("{field}: using {name}");
            }
            value
        })
    }

    /// Like [`Self::first_present`], falling back to a built-in value.
    pub(crate) fn or_fallback(self, fallback: impl FnOnce() -> T) -> T {
        let field = self.field;
        self.first_present().unwrap_or_else(|| {
            log::debug!("{field}: using built-in default");
            fallback()
        })
    }
}

/// `Some` only for a non-empty list.
pub(crate) fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
    (!values.is_empty()).then(|| values.to_vec())
}
