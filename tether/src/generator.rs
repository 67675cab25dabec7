//! Lazy host-side walk over any foreign iterable.
use log::trace;

use crate::{Bridge, Proxy, Result, Unboxable, Value};

#[derive(Debug, Clone)]
pub struct GeneratorExpression {
    proxy: Proxy,
}

impl GeneratorExpression {
    pub fn new(proxy: Proxy) -> Self {
        Self { proxy }
    }

    /// Evaluates `code` and wraps whatever it produced.
    pub fn eval(bridge: &Bridge, code: &str) -> Result<Self> {
        Ok(Self::new(bridge.eval(code)?))
    }

    #[inline]
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// One foreign `length` call.
    pub fn len(&self) -> Result<usize> {
        let bridge = self.proxy.bridge();
        let length = bridge.global("length")?;
        bridge.safe_call(length, &[&self.proxy], |length| {
            usize::unbox_value(bridge, length)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn iter(&self) -> GeneratorIter<'_> {
        GeneratorIter {
            generator: self,
            state: None,
            done: false,
        }
    }

    /// The yielded values read as 0-based positions.
    pub fn indices(&self) -> Result<Vec<usize>> {
        self.iter().map(|element| element?.get::<usize>()).collect()
    }
}

/// Drives `iterate(x)` then `iterate(x, state)` until it returns `nothing`.
/// A foreign error ends the walk after being yielded once.
pub struct GeneratorIter<'a> {
    generator: &'a GeneratorExpression,
    state: Option<Proxy>,
    done: bool,
}

impl GeneratorIter<'_> {
    fn advance(&mut self) -> Result<Option<Proxy>> {
        let generator = self.generator;
        let proxy = &generator.proxy;
        let bridge = proxy.bridge();
        let iterate = bridge.global("iterate")?;
        let next = |step: Value| -> Result<Option<(Proxy, Proxy)>> {
            let runtime = bridge.runtime();
            if runtime.is_identical(step, runtime.nothing()) {
                return Ok(None);
            }
            let element = runtime.get_field(step, "1");
            bridge.forward_last_exception()?;
            let state = runtime.get_field(step, "2");
            bridge.forward_last_exception()?;
            Ok(Some((
                Proxy::new(bridge, element, None),
                Proxy::new(bridge, state, None),
            )))
        };
        let step = match &self.state {
            None => bridge.safe_call(iterate, &[proxy], next)?,
            Some(state) => bridge.safe_call(iterate, &[proxy, state], next)?,
        };
        Ok(step.map(|(element, state)| {
            trace!("{} yielded {:?}", proxy.name(), element.as_raw());
            self.state = Some(state);
            element
        }))
    }
}

impl Iterator for GeneratorIter<'_> {
    type Item = Result<Proxy>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bridge, stress_bridge};

    #[test]
    fn ranges_are_walked_lazily() {
        let bridge = bridge();
        let generator = GeneratorExpression::eval(&bridge, "3:6").unwrap();
        assert_eq!(generator.len().unwrap(), 4);
        let mut iter = generator.iter();
        assert_eq!(iter.next().unwrap().unwrap().get::<i64>().unwrap(), 3);
        let rest: Vec<i64> = iter.map(|e| e.unwrap().get().unwrap()).collect();
        assert_eq!(rest, [4, 5, 6]);
        assert_eq!(generator.indices().unwrap(), [3, 4, 5, 6]);
    }

    #[test]
    fn empty_iterables() {
        let bridge = bridge();
        let generator = GeneratorExpression::eval(&bridge, "Vector{Int64}()").unwrap();
        assert!(generator.is_empty().unwrap());
        assert_eq!(generator.iter().count(), 0);
    }

    #[test]
    fn strings_yield_chars() {
        let bridge = bridge();
        let generator = GeneratorExpression::eval(&bridge, "\"abc\"").unwrap();
        let chars = generator
            .iter()
            .map(|e| e.unwrap().get::<char>().unwrap())
            .collect::<String>();
        assert_eq!(chars, "abc");
    }

    #[test]
    fn non_iterables_fail_once() {
        let bridge = bridge();
        let generator = GeneratorExpression::eval(&bridge, "1.5").unwrap();
        let mut iter = generator.iter();
        assert!(iter.next().unwrap().unwrap_err().is_foreign());
        assert!(iter.next().is_none());
        assert!(generator.len().is_err());
    }

    #[test]
    fn negative_positions_are_unboxing_errors() {
        let bridge = bridge();
        let generator = GeneratorExpression::eval(&bridge, "[0, -1]").unwrap();
        assert!(matches!(
            generator.indices(),
            Err(crate::Error::Unboxing { .. })
        ));
    }

    #[test]
    fn yielded_elements_survive_collection() {
        let bridge = stress_bridge();
        let generator = GeneratorExpression::eval(&bridge, "[\"x\", \"y\"]").unwrap();
        let elements = generator.iter().collect::<crate::Result<Vec<_>>>().unwrap();
        bridge.collect_garbage();
        let text: Vec<String> = elements.iter().map(|e| e.get().unwrap()).collect();
        assert_eq!(text, ["x", "y"]);
    }
}
