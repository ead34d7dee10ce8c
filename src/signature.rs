//! Static fallback device names, used for display when the firmware catalog
//! has no entry for a given signature.

/// `(signature, short_name, long_name)`.
const SIGNATURES: &[((u8, u8, u8), &str, &str)] = &[
    ((0x1E, 0x90, 0x01), "at90s1200", "AT90S1200"),
    ((0x1E, 0x91, 0x01), "at90s2313", "AT90S2313"),
    ((0x1E, 0x91, 0x02), "attiny26", "ATtiny26"),
    ((0x1E, 0x91, 0x03), "attiny2313", "ATtiny2313"),
    ((0x1E, 0x92, 0x01), "at90s4414", "AT90S4414"),
    ((0x1E, 0x92, 0x02), "at90s4433", "AT90S4433"),
    ((0x1E, 0x92, 0x05), "attiny25", "ATtiny25"),
    ((0x1E, 0x92, 0x06), "attiny45", "ATtiny45 (shared signature, see attiny25)"),
    ((0x1E, 0x93, 0x01), "at90s8515", "AT90S8515"),
    ((0x1E, 0x93, 0x03), "at90s8535", "AT90S8535"),
    ((0x1E, 0x93, 0x07), "atmega8", "ATmega8"),
    ((0x1E, 0x93, 0x0A), "attiny85", "ATtiny85"),
    ((0x1E, 0x93, 0x0B), "attiny84", "ATtiny84"),
    ((0x1E, 0x93, 0x0F), "atmega8515", "ATmega8515"),
    ((0x1E, 0x93, 0x89), "atmega8535", "ATmega8535"),
    ((0x1E, 0x94, 0x03), "atmega16", "ATmega16"),
    ((0x1E, 0x94, 0x04), "atmega163", "ATmega163"),
    ((0x1E, 0x94, 0x06), "atmega162", "ATmega162"),
    ((0x1E, 0x94, 0x0B), "atmega164p", "ATmega164P"),
    ((0x1E, 0x95, 0x02), "atmega32", "ATmega32"),
    ((0x1E, 0x95, 0x0F), "atmega328p", "ATmega328P"),
    ((0x1E, 0x95, 0x14), "atmega328", "ATmega328"),
    ((0x1E, 0x95, 0x87), "atmega32u4", "ATmega32U4"),
    ((0x1E, 0x96, 0x02), "atmega64", "ATmega64"),
    ((0x1E, 0x97, 0x01), "atmega128", "ATmega128"),
    ((0x1E, 0x97, 0x02), "atmega1280", "ATmega1280"),
    ((0x1E, 0x97, 0x03), "atmega1281", "ATmega1281"),
    ((0x1E, 0x98, 0x01), "atmega2560", "ATmega2560"),
    ((0x1E, 0x98, 0x02), "atmega2561", "ATmega2561"),
];

/// Looks up the short/long name pair for a signature, if known.
pub fn lookup(signature: (u8, u8, u8)) -> Option<(&'static str, &'static str)> {
    SIGNATURES
        .iter()
        .find(|(sig, _, _)| *sig == signature)
        .map(|(_, short, long)| (*short, *long))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_finds_atmega8() {
        assert_eq!(lookup((0x1E, 0x93, 0x07)), Some(("atmega8", "ATmega8")));
    }

    #[test]
    fn it_returns_none_for_unknown_signatures() {
        assert_eq!(lookup((0xFF, 0xFF, 0xFF)), None);
    }
}
