//! Published BIP test vectors, run through the public API.

use tapforge_core::address::{Address, Network, Payload};
use tapforge_core::script::Script;
use tapforge_core::sighash::{EcdsaSighashType, SighashCache};
use tapforge_core::taproot::{TaprootLeaf, TaprootTreeBuilder};
use tapforge_core::types::Transaction;
use tapforge_tests::helpers::ABANDON;
use tapforge_wallet::hd::{DerivationPath, ExtendedKey, HdKeyTree, Purpose};
use tapforge_wallet::keys::KeyMaterial;
use tapforge_wallet::mnemonic::{mnemonic_to_seed, validate_mnemonic};

fn hex32(s: &str) -> [u8; 32] {
    hex::decode(s).unwrap().try_into().unwrap()
}

// ------------------------------------------------------------------
// BIP39
// ------------------------------------------------------------------

#[test]
fn bip39_seed_empty_passphrase() {
    let seed = mnemonic_to_seed(ABANDON, "").unwrap();
    assert_eq!(
        hex::encode(seed.as_bytes()),
        "5eb00bbddcf069084889a8ab9155568165f5c453ccb85e70811aaed6f6da5fc19a5ac40b389cd370d086206dec8aa6c43daea6690f20ad3d8d48b2d2ce9e38e4"
    );
}

#[test]
fn bip39_seed_trezor_passphrase() {
    let seed = mnemonic_to_seed(ABANDON, "TREZOR").unwrap();
    assert_eq!(
        hex::encode(seed.as_bytes()),
        "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
    );
}

#[test]
fn bip39_bad_checksum_rejected() {
    let phrase = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon";
    assert!(validate_mnemonic(phrase).is_err());
}

// ------------------------------------------------------------------
// BIP32 test vector 1
// ------------------------------------------------------------------

#[test]
fn bip32_vector1() {
    let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
    let master = ExtendedKey::master_from_seed(&seed, Network::Mainnet).unwrap();
    assert_eq!(
        master.to_xprv().unwrap().as_str(),
        "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi"
    );

    let chain = [
        (
            "m/0'",
            "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7",
            "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw",
        ),
        (
            "m/0'/1",
            "xprv9wTYmMFdV23N2TdNG573QoEsfRrWKQgWeibmLntzniatZvR9BmLnvSxqu53Kw1UmYPxLgboyZQaXwTCg8MSY3H2EU4pWcQDnRnrVA1xe8fs",
            "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMiGj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ",
        ),
    ];
    for (path, xprv, xpub) in chain {
        let key = master.derive_path(&path.parse().unwrap()).unwrap();
        assert_eq!(key.to_xprv().unwrap().as_str(), xprv, "{path}");
        assert_eq!(key.to_xpub(), xpub, "{path}");
    }

    let path: DerivationPath = "m/0'/1/2'".parse().unwrap();
    let child = master.derive_path(&path).unwrap();
    assert_eq!(
        child.to_xpub(),
        "xpub6D4BDPcP2GT577Vvch3R8wDkScZWzQzMMUm3PWbmWvVJrZwQY4VUNgqFJPMM3No2dFDFGTsxxpG5uJh7n7epu4trkrX7x7DogT5Uv6fcLW5"
    );
    assert_eq!(child.depth(), 3);

    let parsed: ExtendedKey = child.to_xpub().parse().unwrap();
    assert!(!parsed.is_private());
    assert_eq!(parsed.public_key(), child.public_key());
}

// ------------------------------------------------------------------
// BIP44 / BIP49 / BIP84 / BIP86 for the "abandon ... about" mnemonic
// ------------------------------------------------------------------

#[test]
fn first_receive_addresses() {
    let mut tree = HdKeyTree::from_mnemonic(ABANDON, "", Network::Mainnet, 0).unwrap();
    let cases = [
        (Purpose::Bip44, "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"),
        (Purpose::Bip49, "37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf"),
        (Purpose::Bip84, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"),
        (Purpose::Bip86, "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"),
    ];
    for (purpose, expected) in cases {
        assert_eq!(tree.next_address(purpose).unwrap().to_string(), expected, "{purpose:?}");
    }
}

#[test]
fn account_xpubs() {
    let mut tree = HdKeyTree::from_mnemonic(ABANDON, "", Network::Mainnet, 0).unwrap();
    assert_eq!(
        tree.account_xpub(Purpose::Bip44).unwrap(),
        "xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj"
    );
    assert_eq!(
        tree.account_xpub(Purpose::Bip84).unwrap(),
        "xpub6CatWdiZiodmUeTDp8LT5or8nmbKNcuyvz7WyksVFkKB4RHwCD3XyuvPEbvqAQY3rAPshWcMLoP2fMFMKHPJ4ZeZXYVUhLv1VMrjPC7PW6V"
    );
    assert_eq!(
        tree.account_xpub(Purpose::Bip86).unwrap(),
        "xpub6BgBgsespWvERF3LHQu6CnqdvfEvtMcQjYrcRzx53QJjSxarj2afYWcLteoGVky7D3UKDP9QyrLprQ3VCECoY49yfdDEHGCtMMj92pReUsQ"
    );
}

#[test]
fn bip86_first_key_tweak() {
    let tree = HdKeyTree::from_mnemonic(ABANDON, "", Network::Mainnet, 0).unwrap();
    let key = tree.derive_path(&"m/86'/0'/0'/0/0".parse().unwrap()).unwrap();
    let internal = key.to_key_material().unwrap().x_only_public_key().0;
    assert_eq!(
        hex::encode(internal.serialize()),
        "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115"
    );
    let address = key.address(Purpose::Bip86).unwrap();
    assert_eq!(
        *address.payload(),
        Payload::P2tr(hex32("a60869f0dbcf1dc659c9cecbaf8050135ea9e8cdc487053f1dc6880949dc684c"))
    );
}

#[test]
fn change_and_testnet_addresses() {
    let mut main = HdKeyTree::from_mnemonic(ABANDON, "", Network::Mainnet, 0).unwrap();
    assert_eq!(
        main.next_change_address(Purpose::Bip84).unwrap().to_string(),
        "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el"
    );
    let mut test = HdKeyTree::from_mnemonic(ABANDON, "", Network::Testnet, 0).unwrap();
    assert_eq!(
        test.next_address(Purpose::Bip84).unwrap().to_string(),
        "tb1q6rz28mcfaxtmd6v789l9rrlrusdprr9pqcpvkl"
    );
}

// ------------------------------------------------------------------
// BIP173 / BIP350 encodings
// ------------------------------------------------------------------

#[test]
fn bech32_variant_per_witness_version() {
    let v0: Address = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".parse().unwrap();
    assert_eq!(
        v0.script_pubkey().to_hex(),
        "0014751e76e8199196d454941c45d1b3a323f1433bd6"
    );
    let v1: Address = "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0".parse().unwrap();
    assert_eq!(
        v1.script_pubkey().to_hex(),
        "512079be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
    );

    // v1 with a Bech32 checksum, v0 with a Bech32m checksum
    assert!("bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqh2y7hd".parse::<Address>().is_err());
    assert!("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kemeawh".parse::<Address>().is_err());
}

// ------------------------------------------------------------------
// BIP341 single-leaf tree
// ------------------------------------------------------------------

#[test]
fn bip341_single_leaf() {
    let internal = secp256k1::XOnlyPublicKey::from_slice(&hex32(
        "187791b6f712a8ea41c8ecdd0ee77fab3e85263b37e1ec18a3651926b3a6cf27",
    ))
    .unwrap();
    let script = Script::from_hex("20d85a959b0290bf19bb89ed43c916be835475d013da4b362117393e25a48229b8ac").unwrap();
    let mut builder = TaprootTreeBuilder::new(internal);
    builder.add_tapscript(script.clone());
    let info = builder.finalize().unwrap();

    assert_eq!(
        info.address(Network::Mainnet).to_string(),
        "bc1pz37fc4cn9ah8anwm4xqqhvxygjf9rjf2resrw8h8w4tmvcs0863sa2e586"
    );
    let cb = info.control_block(&TaprootLeaf::tapscript(script)).unwrap();
    assert_eq!(
        hex::encode(cb.serialize()),
        "c1187791b6f712a8ea41c8ecdd0ee77fab3e85263b37e1ec18a3651926b3a6cf27"
    );
}

// ------------------------------------------------------------------
// BIP143 native P2WPKH
// ------------------------------------------------------------------

const BIP143_UNSIGNED: &str = "0100000002fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f0000000000eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac11000000";

#[test]
fn bip143_native_p2wpkh_signature() {
    let tx = Transaction::from_hex(BIP143_UNSIGNED).unwrap();
    let key = KeyMaterial::from_secret_bytes(hex32(
        "619c335025c7f4012e556c2a58b2506e30b8511b53ade95ea316fd8c3286feb9",
    ))
    .unwrap();
    assert_eq!(
        hex::encode(key.public_key().serialize()),
        "025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee6357"
    );

    let script_code = Script::p2pkh(&hex::decode("1d0f172a0ecb48aee1be1f2687d2963ae33f71a1").unwrap().try_into().unwrap());
    let mut cache = SighashCache::new(&tx);
    let sighash = cache
        .segwit_v0_signature_hash(1, &script_code, 600_000_000, EcdsaSighashType::All)
        .unwrap();
    assert_eq!(
        sighash.to_string(),
        "c37af31116d1b27caf68aae9e3ac82f1477929014d5b917657d0eb49478cb670"
    );

    let sig = key.sign_ecdsa(&sighash).unwrap();
    assert_eq!(
        hex::encode(sig.serialize_der()),
        "304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee"
    );
}
