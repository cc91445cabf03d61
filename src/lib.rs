pub mod bits;
pub mod circuit;
pub mod delay;
pub mod library;
pub mod sim;
pub mod types;
pub mod wave;

/// Extract the name of the pin from the full path.
/// For example, `and4/A` -> `A`
pub fn pin_name_ref(pin: &str) -> &str {
    let Some(v) = pin.rsplit_once('/') else {
        return pin;
    };
    v.1
}

/// Extract the name of the pin from the full path.
/// For example, `and4/A` -> `A`
pub fn pin_name(pin: &str) -> String {
    let Some(v) = pin.rsplit_once('/') else {
        return pin.to_string();
    };
    v.1.to_string()
}

/// Extract the name of the instance from the full path.
/// For example, `and4/A` -> `and4`
pub fn instance_name(pin: &str) -> String {
    let Some(v) = pin.rsplit_once('/') else {
        return pin.to_string();
    };
    v.0.to_string()
}
