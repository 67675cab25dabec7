//! Usertypes: host structs mirrored as foreign structs.
//!
//! A [`Usertype`] collects field mappings while building, then materializes
//! exactly once into a foreign struct definition. From then on the mapping is
//! frozen and instances can be boxed and unboxed through it.
use std::{fmt, sync::Arc};

use log::{debug, info};
use parking_lot::RwLock;

use crate::{Boxable, Bridge, Error, Proxy, Result, Type, Unboxable, Value};

pub type FieldGetter<T> = Box<dyn Fn(&Bridge, &T) -> Result<Value> + Send + Sync>;
pub type FieldSetter<T> = Box<dyn Fn(&Bridge, &mut T, Value) -> Result<()> + Send + Sync>;

pub struct FieldMapping<T> {
    name: String,
    /// foreign type expression of the field
    field_type: String,
    getter: FieldGetter<T>,
    setter: FieldSetter<T>,
}

impl<T> fmt::Debug for FieldMapping<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.name, self.field_type)
    }
}

enum UsertypeState<T> {
    Building {
        mutable: bool,
        fields: Vec<FieldMapping<T>>,
    },
    Materialized {
        ty: Type,
        mutable: bool,
        fields: Arc<[FieldMapping<T>]>,
    },
}

pub struct Usertype<T> {
    name: String,
    state: RwLock<UsertypeState<T>>,
}

impl<T> fmt::Debug for Usertype<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        let (mutable, fields, materialized) = match &*state {
            UsertypeState::Building { mutable, fields } => (*mutable, fields.as_slice(), false),
            UsertypeState::Materialized {
                mutable, fields, ..
            } => (*mutable, &fields[..], true),
        };
        f.debug_struct("Usertype")
            .field("name", &self.name)
            .field("mutable", &mutable)
            .field("materialized", &materialized)
            .field("fields", &fields)
            .finish()
    }
}

impl<T> Usertype<T> {
    /// Starts building an immutable usertype with no fields.
    pub fn enable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(UsertypeState::Building {
                mutable: false,
                fields: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_mutable(&self) -> bool {
        match &*self.state.read() {
            UsertypeState::Building { mutable, .. }
            | UsertypeState::Materialized { mutable, .. } => *mutable,
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(&*self.state.read(), UsertypeState::Materialized { .. })
    }

    /// The foreign type, once materialized.
    pub fn foreign_type(&self) -> Result<Type> {
        match &*self.state.read() {
            UsertypeState::Materialized { ty, .. } => Ok(ty.clone()),
            UsertypeState::Building { .. } => Err(self.not_initialized()),
        }
    }

    fn not_initialized(&self) -> Error {
        Error::NotInitialized {
            name: self.name.clone(),
        }
    }

    fn already_finalized(&self) -> Error {
        Error::AlreadyFinalized {
            name: self.name.clone(),
        }
    }

    fn building<R>(
        &self,
        f: impl FnOnce(&mut bool, &mut Vec<FieldMapping<T>>) -> R,
    ) -> Result<R> {
        match &mut *self.state.write() {
            UsertypeState::Building { mutable, fields } => Ok(f(mutable, fields)),
            UsertypeState::Materialized { .. } => Err(self.already_finalized()),
        }
    }

    pub fn set_mutable(&self, mutable: bool) -> Result<()> {
        self.building(|current, _| *current = mutable)
    }

    fn push_field(&self, field: FieldMapping<T>) -> Result<()> {
        self.building(|_, fields| {
            match fields.iter_mut().find(|existing| existing.name == field.name) {
                Some(existing) => {
                    debug!("{}: field {} remapped", self.name, field.name);
                    *existing = field;
                }
                None => fields.push(field),
            }
        })
    }

    /// Maps the foreign field `name` of type `field_type` through raw values.
    pub fn add_field(
        &self,
        name: &str,
        field_type: &Type,
        getter: impl Fn(&Bridge, &T) -> Result<Value> + Send + Sync + 'static,
        setter: impl Fn(&Bridge, &mut T, Value) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        self.push_field(FieldMapping {
            name: name.to_string(),
            field_type: field_type.name(),
            getter: Box::new(getter),
            setter: Box::new(setter),
        })
    }

    /// [`add_field`](Self::add_field) for a host field that boxes on its own.
    pub fn add_property<F>(
        &self,
        name: &str,
        getter: impl Fn(&T) -> F + Send + Sync + 'static,
        setter: impl Fn(&mut T, F) + Send + Sync + 'static,
    ) -> Result<()>
    where
        F: Boxable + Unboxable,
    {
        self.push_field(FieldMapping {
            name: name.to_string(),
            field_type: F::foreign_type_name(),
            getter: Box::new(move |bridge: &Bridge, host: &T| {
                getter(host).box_value(bridge)
            }),
            setter: Box::new(move |bridge: &Bridge, host: &mut T, value: Value| {
                setter(host, F::unbox_value(bridge, value)?);
                Ok(())
            }),
        })
    }

    fn definition(&self, mutable: bool, fields: &[FieldMapping<T>]) -> String {
        let mut source = String::new();
        if mutable {
            source.push_str("mutable ");
        }
        source.push_str("struct ");
        source.push_str(&self.name);
        source.push('\n');
        for field in fields {
            source.push_str(&format!("  {}::{}\n", field.name, field.field_type));
        }
        source.push_str("end");
        source
    }

    /// Defines the foreign struct. Only the first successful call does
    /// anything, the field mapping is frozen afterwards.
    pub fn materialize(&self, bridge: &Bridge) -> Result<Type> {
        // bridge lock before usertype state, the order box_value takes them in
        let _lock = bridge.lock();
        let mut state = self.state.write();
        let UsertypeState::Building { mutable, fields } = &mut *state else {
            return Err(self.already_finalized());
        };
        let mutable = *mutable;
        bridge.eval(&self.definition(mutable, fields))?;
        let ty = bridge.resolve_type(&self.name)?;
        info!(
            "materialized usertype {} with {} fields",
            self.name,
            fields.len()
        );
        let fields = std::mem::take(fields).into();
        *state = UsertypeState::Materialized {
            ty: ty.clone(),
            mutable,
            fields,
        };
        Ok(ty)
    }

    fn materialized(&self) -> Result<(Type, Arc<[FieldMapping<T>]>)> {
        match &*self.state.read() {
            UsertypeState::Materialized { ty, fields, .. } => Ok((ty.clone(), fields.clone())),
            UsertypeState::Building { .. } => Err(self.not_initialized()),
        }
    }

    /// Constructs the foreign struct from the mapped fields of `host`.
    ///
    /// The result is not anchored, call this inside a
    /// [`GcPause`](crate::GcPause) or use [`create`](Self::create).
    pub fn box_value(&self, bridge: &Bridge, host: &T) -> Result<Value> {
        let (ty, fields) = self.materialized()?;
        let _pause = bridge.pause();
        let values = fields
            .iter()
            .map(|field| (field.getter)(bridge, host))
            .collect::<Result<Vec<_>>>()?;
        let args = values
            .iter()
            .map(|value| value as &dyn Boxable)
            .collect::<Vec<_>>();
        bridge.safe_call(ty.as_raw(), &args, Ok)
    }

    pub fn create(&self, bridge: &Bridge, host: &T) -> Result<Proxy> {
        let _pause = bridge.pause();
        let value = self.box_value(bridge, host)?;
        Ok(Proxy::new(bridge, value, None))
    }

    /// Starts from `T::default()` and applies every setter to the matching
    /// foreign field.
    pub fn unbox_value(&self, bridge: &Bridge, value: Value) -> Result<T>
    where
        T: Default,
    {
        let (ty, fields) = self.materialized()?;
        let _pause = bridge.pause();
        let runtime = bridge.runtime();
        if !runtime.isa(value, ty.as_raw()) {
            return Err(Error::unboxing(
                self.name.clone(),
                runtime.type_name(runtime.type_of(value)),
            ));
        }
        let mut host = T::default();
        for field in fields.iter() {
            let foreign = runtime.get_field(value, &field.name);
            bridge.forward_last_exception()?;
            (field.setter)(bridge, &mut host, foreign)?;
        }
        Ok(host)
    }
}

/// Host types with one registered usertype.
///
/// Pair with [`usertype_boxing!`](crate::usertype_boxing) so the type boxes
/// and unboxes like any other value, including inside containers.
pub trait UsertypeInfo: Sized + 'static {
    fn usertype() -> &'static Usertype<Self>;
}

/// Implements [`Boxable`] and [`Unboxable`] through [`UsertypeInfo`].
///
/// Unboxing starts from `Default::default()`, the usertype must be
/// materialized before either direction is used.
#[macro_export]
macro_rules! usertype_boxing {
    ($($host:ty),* $(,)?) => {$(
        impl $crate::Boxable for $host {
            fn box_value(&self, bridge: &$crate::Bridge) -> $crate::Result<$crate::Value> {
                <$host as $crate::UsertypeInfo>::usertype().box_value(bridge, self)
            }

            fn foreign_type_name() -> String {
                <$host as $crate::UsertypeInfo>::usertype().name().to_string()
            }
        }

        impl $crate::Unboxable for $host {
            fn unbox_value(bridge: &$crate::Bridge, value: $crate::Value) -> $crate::Result<Self> {
                <$host as $crate::UsertypeInfo>::usertype().unbox_value(bridge, value)
            }
        }
    )*};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{OnceLock, mpsc},
        thread,
        time::Duration,
    };

    use crate::{boxing, testing::bridge};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Particle {
        label: String,
        mass: f64,
        charges: Vec<i64>,
    }

    fn particle_type(name: &str) -> Usertype<Particle> {
        let usertype = Usertype::<Particle>::enable(name);
        usertype
            .add_property("label", |p| p.label.clone(), |p, label| p.label = label)
            .unwrap();
        usertype
            .add_property("mass", |p| p.mass, |p, mass| p.mass = mass)
            .unwrap();
        usertype
            .add_property(
                "charges",
                |p| p.charges.clone(),
                |p, charges| p.charges = charges,
            )
            .unwrap();
        usertype
    }

    fn electron() -> Particle {
        Particle {
            label: "electron".into(),
            mass: 0.511,
            charges: vec![-1],
        }
    }

    #[test]
    fn lifecycle_ordering() {
        let bridge = bridge();
        let usertype = particle_type("Particle");
        assert!(!usertype.is_materialized());
        assert!(matches!(
            usertype.box_value(&bridge, &electron()),
            Err(Error::NotInitialized { .. })
        ));
        assert!(matches!(
            usertype.foreign_type(),
            Err(Error::NotInitialized { .. })
        ));
        let foreign = bridge.eval("Base.nothing").unwrap();
        assert!(matches!(
            usertype.unbox_value(&bridge, foreign.as_raw()),
            Err(Error::NotInitialized { .. })
        ));

        let ty = usertype.materialize(&bridge).unwrap();
        assert!(usertype.is_materialized());
        assert_eq!(ty.name(), "Particle");
        assert!(!ty.is_mutable());

        assert!(matches!(
            usertype.materialize(&bridge),
            Err(Error::AlreadyFinalized { .. })
        ));
        assert!(matches!(
            usertype.set_mutable(true),
            Err(Error::AlreadyFinalized { .. })
        ));
        assert!(matches!(
            usertype.add_property("spin", |_| 0.5f64, |_, _| {}),
            Err(Error::AlreadyFinalized { .. })
        ));
        assert!(usertype.is_materialized());
        assert_eq!(usertype.foreign_type().unwrap(), ty);
    }

    #[test]
    fn materializing_while_another_thread_holds_a_pause() {
        let bridge = bridge();
        let usertype = particle_type("Contended");
        let (started, wait_started) = mpsc::channel();
        let (done, finished) = mpsc::channel();
        thread::scope(|scope| {
            let pause = bridge.pause();
            scope.spawn(|| {
                started.send(()).unwrap();
                let materialized = usertype.materialize(&bridge).map(|ty| ty.name());
                done.send(materialized).unwrap();
            });
            wait_started.recv().unwrap();
            thread::sleep(Duration::from_millis(50));
            // the materializing thread is parked on the bridge lock, not on our state
            assert!(matches!(
                usertype.box_value(&bridge, &electron()),
                Err(Error::NotInitialized { .. })
            ));
            drop(pause);
            let materialized = finished.recv_timeout(Duration::from_secs(10)).unwrap();
            assert_eq!(materialized.unwrap(), "Contended");
        });
        assert!(usertype.create(&bridge, &electron()).is_ok());
    }

    #[test]
    fn instances_round_trip() {
        let bridge = bridge();
        let usertype = particle_type("Particle");
        let ty = usertype.materialize(&bridge).unwrap();
        let proxy = usertype.create(&bridge, &electron()).unwrap();
        assert!(proxy.isa(&ty));
        assert_eq!(proxy.field("mass").unwrap().get::<f64>().unwrap(), 0.511);
        assert_eq!(
            usertype.unbox_value(&bridge, proxy.as_raw()).unwrap(),
            electron()
        );

        let fields = ty.fields().unwrap();
        let names: Vec<_> = fields.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["label", "mass", "charges"]);
        assert_eq!(fields[2].1.name(), "Vector{Int64}");
    }

    #[test]
    fn instances_built_by_foreign_code_unbox() {
        let bridge = bridge();
        let usertype = particle_type("Particle");
        usertype.materialize(&bridge).unwrap();
        let proxy = bridge.eval("Particle(\"muon\", 105.7, [-1, 0])").unwrap();
        let muon = usertype.unbox_value(&bridge, proxy.as_raw()).unwrap();
        assert_eq!(muon.label, "muon");
        assert_eq!(muon.charges, [-1, 0]);

        let other = bridge.eval("1.0").unwrap();
        assert!(matches!(
            usertype.unbox_value(&bridge, other.as_raw()),
            Err(Error::Unboxing { .. })
        ));
    }

    #[test]
    fn duplicate_fields_replace_in_place() {
        let bridge = bridge();
        let usertype = particle_type("Relabeled");
        usertype
            .add_property(
                "label",
                |p: &Particle| boxing::Symbol(p.label.clone()),
                |p, label| p.label = label.0,
            )
            .unwrap();
        let ty = usertype.materialize(&bridge).unwrap();
        let fields = ty.fields().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].0, "label");
        assert_eq!(fields[0].1.name(), "Symbol");
    }

    #[test]
    fn mutable_usertypes() {
        let bridge = bridge();
        let usertype = particle_type("Tracked");
        usertype.set_mutable(true).unwrap();
        assert!(usertype.is_mutable());
        let ty = usertype.materialize(&bridge).unwrap();
        assert!(ty.is_mutable() && usertype.is_mutable());
        let proxy = usertype.create(&bridge, &electron()).unwrap();
        proxy.set_field("mass", &1.0f64).unwrap();
        let updated = usertype.unbox_value(&bridge, proxy.as_raw()).unwrap();
        assert_eq!(updated.mass, 1.0);
    }

    #[test]
    fn raw_fields() {
        let bridge = bridge();
        let usertype = Usertype::<Particle>::enable("Weight");
        let float = bridge.resolve_type("Float64").unwrap();
        usertype
            .add_field(
                "grams",
                &float,
                |bridge, p| boxing::box_value(bridge, &(p.mass * 1000.0)),
                |bridge, p, value| {
                    p.mass = f64::unbox_value(bridge, value)? / 1000.0;
                    Ok(())
                },
            )
            .unwrap();
        usertype.materialize(&bridge).unwrap();
        let heavy = Particle {
            mass: 0.25,
            ..Particle::default()
        };
        let proxy = usertype.create(&bridge, &heavy).unwrap();
        assert_eq!(proxy.field("grams").unwrap().get::<f64>().unwrap(), 250.0);
        assert_eq!(usertype.unbox_value(&bridge, proxy.as_raw()).unwrap(), heavy);
    }

    impl UsertypeInfo for Particle {
        fn usertype() -> &'static Usertype<Self> {
            static REGISTERED: OnceLock<Usertype<Particle>> = OnceLock::new();
            REGISTERED.get_or_init(|| particle_type("Registered"))
        }
    }

    crate::usertype_boxing!(Particle);

    #[test]
    fn registered_usertypes_box_like_values() {
        let bridge = bridge();
        assert!(matches!(
            bridge.create(&electron()),
            Err(Error::NotInitialized { .. })
        ));
        let ty = Particle::usertype().materialize(&bridge).unwrap();
        assert_eq!(Particle::foreign_type_name(), "Registered");

        let proxy = bridge.create(&electron()).unwrap();
        assert!(proxy.isa(&ty));
        assert_eq!(proxy.get::<Particle>().unwrap(), electron());

        let muon = Particle {
            label: "muon".into(),
            mass: 105.7,
            charges: vec![-1],
        };
        let particles = vec![electron(), muon];
        let vector = bridge.create(&particles).unwrap();
        assert_eq!(vector.type_of().unwrap().name(), "Vector{Registered}");
        assert_eq!(vector.get::<Vec<Particle>>().unwrap(), particles);
    }

    #[test]
    fn failed_materialization_keeps_building() {
        let bridge = bridge();
        bridge.eval("struct Taken\n  x::Int64\nend").unwrap();
        let usertype = particle_type("Taken");
        assert!(usertype.materialize(&bridge).unwrap_err().is_foreign());
        assert!(!usertype.is_materialized());
        assert!(usertype.set_mutable(true).is_ok());
    }
}
